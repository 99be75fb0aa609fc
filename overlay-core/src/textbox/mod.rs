//! Text-box Injector (component F): writes a small script bytecode
//! program into cartridge-mapped RAM and triggers its execution, then
//! polls the engine's result variable.

pub mod font;

use crate::config::BattleLinkAddresses;
use crate::memory::{Domain, MemoryBus, MemoryBusExt};
use crate::model::TextboxKind;

// Opcodes, per §6.
const OP_END: u8 = 0x02;
const OP_CALLSTD: u8 = 0x09;
const OP_LOADWORD: u8 = 0x0F;
const OP_SETVAR: u8 = 0x16;
const OP_CLOSEMESSAGE: u8 = 0x68;
const OP_LOCK: u8 = 0x6A;
const OP_RELEASE: u8 = 0x6C;

const STD_MSGBOX_DEFAULT: u8 = 0x02;
const STD_MSGBOX_YESNO: u8 = 0x05;

/// `VAR_0x8001`'s numeric variable id, matching the ROM's own
/// special-var numbering scheme (`0x8000`-and-up are script temporaries).
const VAR_0X8001_ID: u16 = 0x8001;

/// Frames to wait after triggering a script before polling its result
/// variable, giving the script engine time to actually start running.
pub const STARTUP_DELAY: u32 = 6;

/// Extra frames to wait after capturing a result before reporting it, so
/// the in-flight script can run its own `closemessage`/`release` cleanly.
pub const SCRIPT_SETTLE_FRAMES: u8 = 2;

/// `VAR_RESULT`'s "not yet written" sentinel.
pub const VAR_RESULT_SENTINEL: u16 = 0x007F;

/// A tiny byte program builder, tracking the cursor the way a real script
/// assembler would, and word-padding the final buffer since the native
/// loader expects program sizes in 32-bit words.
#[derive(Default)]
struct ScriptBuilder {
    bytes: Vec<u8>,
}

impl ScriptBuilder {
    fn new() -> Self {
        ScriptBuilder::default()
    }

    fn push_u8(&mut self, v: u8) -> &mut Self {
        self.bytes.push(v);
        self
    }

    fn push_u16(&mut self, v: u16) -> &mut Self {
        self.bytes.extend_from_slice(&v.to_le_bytes());
        self
    }

    fn push_u32(&mut self, v: u32) -> &mut Self {
        self.bytes.extend_from_slice(&v.to_le_bytes());
        self
    }

    fn lock(&mut self) -> &mut Self {
        self.push_u8(OP_LOCK)
    }

    fn release(&mut self) -> &mut Self {
        self.push_u8(OP_RELEASE)
    }

    fn end(&mut self) -> &mut Self {
        self.push_u8(OP_END)
    }

    fn loadword(&mut self, reg: u8, addr: u32) -> &mut Self {
        self.push_u8(OP_LOADWORD).push_u8(reg).push_u32(addr)
    }

    fn callstd(&mut self, std_id: u8) -> &mut Self {
        self.push_u8(OP_CALLSTD).push_u8(std_id)
    }

    fn closemessage(&mut self) -> &mut Self {
        self.push_u8(OP_CLOSEMESSAGE)
    }

    fn setvar(&mut self, var: u16, value: u16) -> &mut Self {
        self.push_u8(OP_SETVAR).push_u16(var).push_u16(value)
    }

    /// Pads the program to a 4-byte boundary and returns it.
    fn build(&mut self) -> Vec<u8> {
        while self.bytes.len() % 4 != 0 {
            self.bytes.push(0);
        }
        std::mem::take(&mut self.bytes)
    }
}

/// `lock; loadword r0, &textAddr; callstd STD_MSGBOX_YESNO; closemessage;
/// release; end` — 3 words once padded.
fn build_yesno_script(text_addr: u32) -> Vec<u8> {
    let mut builder = ScriptBuilder::new();
    builder
        .lock()
        .loadword(0, text_addr)
        .callstd(STD_MSGBOX_YESNO)
        .closemessage()
        .release()
        .end();
    builder.build()
}

/// Same prefix, then `callstd STD_MSGBOX_DEFAULT; closemessage; setvar
/// VAR_0x8001 = 1; release; end` — 5 words once padded.
fn build_message_script(text_addr: u32) -> Vec<u8> {
    let mut builder = ScriptBuilder::new();
    builder
        .lock()
        .loadword(0, text_addr)
        .callstd(STD_MSGBOX_DEFAULT)
        .closemessage()
        .setvar(VAR_0X8001_ID, 1)
        .release()
        .end();
    builder.build()
}

/// The 12-word "Data mode" table that triggers the engine's script-load
/// mechanism, per §4.F.
fn build_data_mode_table(script_data_addr: u32) -> [u32; 12] {
    [0, 0, 513, 0, script_data_addr + 1, 0, 0, 0, 0, 0, 0, 0]
}

/// What [`TextboxInjector::poll`] reports this frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextboxOutcome {
    /// The script hasn't finished running yet (still in the startup
    /// delay, or no result has been written yet).
    Pending,
    Yes,
    No,
    MessageDone,
}

/// Drives one in-flight textbox: writes the script program, waits out the
/// startup delay, and polls the result variable.
#[derive(Default)]
pub struct TextboxInjector {
    kind: Option<TextboxKind>,
    frames_since_trigger: u32,
    captured: Option<u16>,
    settle_remaining: Option<u8>,
}

impl TextboxInjector {
    pub fn new() -> Self {
        TextboxInjector::default()
    }

    pub fn is_active(&self) -> bool {
        self.kind.is_some()
    }

    fn trigger(&mut self, bus: &mut dyn MemoryBus, addrs: &BattleLinkAddresses, kind: TextboxKind, text: &str) {
        let encoded = font::encode(text);
        bus.write_range_ignore(Domain::Cart, addrs.text_data, &encoded);

        let script = match kind {
            TextboxKind::YesNo => build_yesno_script(addrs.text_data),
            TextboxKind::Message => build_message_script(addrs.text_data),
        };
        bus.write_range_ignore(Domain::Cart, addrs.script_data, &script);

        let table = build_data_mode_table(addrs.script_data);
        let mut table_bytes = Vec::with_capacity(table.len() * 4);
        for word in table {
            table_bytes.extend_from_slice(&word.to_le_bytes());
        }
        bus.write_range_ignore(Domain::Iwram, addrs.script_load, &table_bytes);

        // Arm the sentinel so `poll` can distinguish "not written yet"
        // from a stale value left over from a previous textbox.
        bus.write_u16_ignore(Domain::Ewram, addrs.var_result, VAR_RESULT_SENTINEL);

        self.kind = Some(kind);
        self.frames_since_trigger = 0;
        self.captured = None;
        self.settle_remaining = None;
    }

    pub fn show_yes_no(&mut self, bus: &mut dyn MemoryBus, addrs: &BattleLinkAddresses, text: &str) {
        self.trigger(bus, addrs, TextboxKind::YesNo, text);
    }

    pub fn show_message(&mut self, bus: &mut dyn MemoryBus, addrs: &BattleLinkAddresses, text: &str) {
        self.trigger(bus, addrs, TextboxKind::Message, text);
    }

    /// Advances one frame and reports the textbox's outcome.
    pub fn poll(&mut self, bus: &dyn MemoryBus, addrs: &BattleLinkAddresses) -> TextboxOutcome {
        let Some(kind) = self.kind else {
            return TextboxOutcome::Pending;
        };

        self.frames_since_trigger += 1;
        if self.frames_since_trigger < STARTUP_DELAY {
            return TextboxOutcome::Pending;
        }

        if self.captured.is_none() {
            let raw = bus.read_u16_or(Domain::Ewram, addrs.var_result, VAR_RESULT_SENTINEL);
            if raw != VAR_RESULT_SENTINEL {
                self.captured = Some(raw);
                self.settle_remaining = Some(SCRIPT_SETTLE_FRAMES);
            }
            return TextboxOutcome::Pending;
        }

        if let Some(remaining) = self.settle_remaining {
            if remaining > 0 {
                self.settle_remaining = Some(remaining - 1);
                return TextboxOutcome::Pending;
            }
        }

        let outcome = match kind {
            TextboxKind::YesNo => {
                if self.captured == Some(1) {
                    TextboxOutcome::Yes
                } else {
                    TextboxOutcome::No
                }
            }
            TextboxKind::Message => TextboxOutcome::MessageDone,
        };
        self.kind = None;
        outcome
    }

    /// Unblocks any waiting script path and marks the textbox inactive,
    /// per §4.F's error-recovery rule.
    pub fn clear(&mut self, bus: &mut dyn MemoryBus, addrs: &BattleLinkAddresses) {
        match self.kind {
            Some(TextboxKind::Message) => bus.write_u16_ignore(Domain::Ewram, addrs.var_8001, 1),
            _ => bus.write_u16_ignore(Domain::Ewram, addrs.var_result, 0),
        }
        self.kind = None;
        self.captured = None;
        self.settle_remaining = None;
        self.frames_since_trigger = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::VecMemoryBus;

    fn addrs() -> BattleLinkAddresses {
        BattleLinkAddresses {
            get_multiplayer_id: 0x0800_0000,
            script_load: 0x0300_0000,
            script_data: 0x0800_1000,
            text_data: 0x0800_2000,
            var_result: 0x0200_0000,
            var_8001: 0x0200_0002,
            received_remote: 0x0200_0004,
            wireless_comm_type: 0x0200_0005,
            block_received_status: 0x0200_0006,
            block_recv_buffer: 0x0200_0100,
            link_players: 0x0200_0200,
            battle_resources: 0x0300_0010,
            buffer_a_offset: 0,
            buffer_b_offset: 0x800,
            battle_main_func: 0x0300_0020,
            begin_battle_intro: 0x0800_3000,
            do_battle_intro: 0x0800_3100,
            save_block_2_ptr: 0x0300_0030,
            battle_communication: 0x0200_0300,
            battler_controller_funcs: 0x0200_0400,
            battler_attacker: 0x0200_0500,
            battler_target: 0x0200_0501,
            absent_battler_flags: 0x0200_0502,
            effect_battler: 0x0200_0503,
            link_task_range: (0x0800_4000, 0x0800_5000),
            link_task_table: 0x0300_1000,
            link_task_slot_stride: 40,
            link_task_slot_count: 16,
            link_task_func_offset: 0,
            link_task_dummy_func: 0x0800_6000,
        }
    }

    #[test]
    fn yesno_script_is_three_words() {
        assert_eq!(build_yesno_script(0x0800_2000).len(), 12);
    }

    #[test]
    fn message_script_pads_to_five_words() {
        assert_eq!(build_message_script(0x0800_2000).len(), 20);
    }

    #[test]
    fn full_yes_no_flow() {
        let mut bus = VecMemoryBus::new();
        let addrs = addrs();
        let mut injector = TextboxInjector::new();
        injector.show_yes_no(&mut bus, &addrs, "Challenge Alex?");
        assert!(injector.is_active());

        for _ in 0..STARTUP_DELAY - 1 {
            assert_eq!(injector.poll(&bus, &addrs), TextboxOutcome::Pending);
        }
        // Frame STARTUP_DELAY: still pending, var_result hasn't been
        // written by the (simulated) script engine yet.
        assert_eq!(injector.poll(&bus, &addrs), TextboxOutcome::Pending);

        bus.write_u16(Domain::Ewram, addrs.var_result, 1).unwrap();
        assert_eq!(injector.poll(&bus, &addrs), TextboxOutcome::Pending);
        assert_eq!(injector.poll(&bus, &addrs), TextboxOutcome::Pending);
        assert_eq!(injector.poll(&bus, &addrs), TextboxOutcome::Yes);
        assert!(!injector.is_active());
    }

    #[test]
    fn clear_unblocks_yes_no_by_writing_zero() {
        let mut bus = VecMemoryBus::new();
        let addrs = addrs();
        let mut injector = TextboxInjector::new();
        injector.show_yes_no(&mut bus, &addrs, "Hi");
        injector.clear(&mut bus, &addrs);
        assert_eq!(bus.read_u16(Domain::Ewram, addrs.var_result).unwrap(), 0);
        assert!(!injector.is_active());
    }

    #[test]
    fn clear_unblocks_message_by_writing_var_8001() {
        let mut bus = VecMemoryBus::new();
        let addrs = addrs();
        let mut injector = TextboxInjector::new();
        injector.show_message(&mut bus, &addrs, "Hi");
        injector.clear(&mut bus, &addrs);
        assert_eq!(bus.read_u16(Domain::Ewram, addrs.var_8001).unwrap(), 1);
    }
}
