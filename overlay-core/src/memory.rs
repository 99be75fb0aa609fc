//! Safe, domain-aware read/write access to the emulated GBA's memory
//! buses (component A, the Memory Gateway).
//!
//! The gateway never owns the actual backing bytes — the emulator host
//! does — so [`MemoryBus`] is a trait the host implements over its own raw
//! buffers (typically via `unsafe` FFI). Everything above this module only
//! ever sees [`Result<_, MemoryError>`] and treats an `Err` as "no data
//! this frame", per the error handling design: a failed read or write is
//! never allowed to abort a tick.

use crate::error::MemoryError;

/// One of the GBA's distinct memory regions. Each has its own address
/// range and its own rules about what kind of access is legal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Domain {
    Cart,
    Ewram,
    Iwram,
    Oam,
    Vram,
    Palette,
    Io,
}

impl Domain {
    /// The base address this domain is mapped at in the GBA's 32-bit
    /// address space.
    pub fn base_address(self) -> u32 {
        match self {
            Domain::Cart => 0x0800_0000,
            Domain::Ewram => 0x0200_0000,
            Domain::Iwram => 0x0300_0000,
            Domain::Oam => 0x0700_0000,
            Domain::Vram => 0x0600_0000,
            Domain::Palette => 0x0500_0000,
            Domain::Io => 0x0400_0000,
        }
    }

    /// The size of the domain in bytes. Cart is given a generous ceiling
    /// since the true ROM size is configuration, not a hardware constant;
    /// IO likewise only has soft range checking (the register file is
    /// sparse, not flat).
    pub fn len(self) -> usize {
        match self {
            Domain::Cart => 64 * 1024 * 1024,
            Domain::Ewram => 256 * 1024,
            Domain::Iwram => 32 * 1024,
            Domain::Oam => 1024,
            Domain::Vram => 96 * 1024,
            Domain::Palette => 1024,
            Domain::Io => 0x400,
        }
    }

    /// Translates an absolute address into an offset within this domain,
    /// validating that `addr..addr+len` fits inside the domain's range.
    pub fn offset_of(self, addr: u32, len: usize) -> Result<usize, MemoryError> {
        let base = self.base_address();
        let top = base.wrapping_add(self.len() as u32);
        if addr < base || addr >= top {
            return Err(MemoryError::Unmapped { domain: self, addr });
        }
        let offset = (addr - base) as usize;
        if offset + len > self.len() {
            return Err(MemoryError::OutOfRange {
                domain: self,
                addr,
                len,
            });
        }
        Ok(offset)
    }
}

/// The fallible, host-supplied backing for all memory access.
///
/// Implementors only need to handle the byte-range primitives; the `u8`/
/// `u16`/`u32` helpers are provided as default methods built on top of
/// them, little-endian per the GBA's ARM7TDMI.
pub trait MemoryBus {
    fn read_range(&self, domain: Domain, addr: u32, len: usize) -> Result<Vec<u8>, MemoryError>;
    fn write_range(&mut self, domain: Domain, addr: u32, data: &[u8]) -> Result<(), MemoryError>;

    fn read_u8(&self, domain: Domain, addr: u32) -> Result<u8, MemoryError> {
        Ok(self.read_range(domain, addr, 1)?[0])
    }

    fn read_u16(&self, domain: Domain, addr: u32) -> Result<u16, MemoryError> {
        let bytes = self.read_range(domain, addr, 2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32(&self, domain: Domain, addr: u32) -> Result<u32, MemoryError> {
        let bytes = self.read_range(domain, addr, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn write_u8(&mut self, domain: Domain, addr: u32, value: u8) -> Result<(), MemoryError> {
        self.write_range(domain, addr, &[value])
    }

    fn write_u16(&mut self, domain: Domain, addr: u32, value: u16) -> Result<(), MemoryError> {
        self.write_range(domain, addr, &value.to_le_bytes())
    }

    fn write_u32(&mut self, domain: Domain, addr: u32, value: u32) -> Result<(), MemoryError> {
        self.write_range(domain, addr, &value.to_le_bytes())
    }

    /// Reads a 16-bit camera coordinate and reinterprets it as signed —
    /// values `>= 0x8000` become negative, matching the hardware register's
    /// two's-complement encoding.
    fn read_i16(&self, domain: Domain, addr: u32) -> Result<i16, MemoryError> {
        Ok(self.read_u16(domain, addr)? as i16)
    }
}

/// Convenience "swallow and default" helpers layered over [`MemoryBus`].
///
/// Every component above the gateway treats a failed read as "no change
/// this frame" rather than propagating the error — these helpers write
/// that pattern once instead of re-deriving it at every call site.
pub trait MemoryBusExt: MemoryBus {
    fn read_u8_or(&self, domain: Domain, addr: u32, default: u8) -> u8 {
        self.read_u8(domain, addr).unwrap_or_else(|e| {
            log::debug!("read_u8_or: {e}; using default");
            default
        })
    }

    fn read_u16_or(&self, domain: Domain, addr: u32, default: u16) -> u16 {
        self.read_u16(domain, addr).unwrap_or_else(|e| {
            log::debug!("read_u16_or: {e}; using default");
            default
        })
    }

    fn read_u32_or(&self, domain: Domain, addr: u32, default: u32) -> u32 {
        self.read_u32(domain, addr).unwrap_or_else(|e| {
            log::debug!("read_u32_or: {e}; using default");
            default
        })
    }

    fn read_i16_or(&self, domain: Domain, addr: u32, default: i16) -> i16 {
        self.read_i16(domain, addr).unwrap_or_else(|e| {
            log::debug!("read_i16_or: {e}; using default");
            default
        })
    }

    /// Writes and swallows the error, logging at `warn` since a failed
    /// write (unlike a failed read) silently drops state the caller
    /// thought it had committed.
    fn write_u8_ignore(&mut self, domain: Domain, addr: u32, value: u8) {
        if let Err(e) = self.write_u8(domain, addr, value) {
            log::warn!("write_u8_ignore: {e}");
        }
    }

    fn write_u16_ignore(&mut self, domain: Domain, addr: u32, value: u16) {
        if let Err(e) = self.write_u16(domain, addr, value) {
            log::warn!("write_u16_ignore: {e}");
        }
    }

    fn write_u32_ignore(&mut self, domain: Domain, addr: u32, value: u32) {
        if let Err(e) = self.write_u32(domain, addr, value) {
            log::warn!("write_u32_ignore: {e}");
        }
    }

    fn write_range_ignore(&mut self, domain: Domain, addr: u32, data: &[u8]) {
        if let Err(e) = self.write_range(domain, addr, data) {
            log::warn!("write_range_ignore: {e}");
        }
    }
}

impl<T: MemoryBus + ?Sized> MemoryBusExt for T {}

/// A `Vec<u8>`-backed [`MemoryBus`] used by unit tests throughout the
/// crate, and by any host that wants a reference implementation to copy.
#[cfg(any(test, feature = "test-support"))]
pub struct VecMemoryBus {
    cart: Vec<u8>,
    ewram: Vec<u8>,
    iwram: Vec<u8>,
    oam: Vec<u8>,
    vram: Vec<u8>,
    palette: Vec<u8>,
    io: Vec<u8>,
}

#[cfg(any(test, feature = "test-support"))]
impl VecMemoryBus {
    pub fn new() -> Self {
        VecMemoryBus {
            cart: vec![0xFF; Domain::Cart.len()],
            ewram: vec![0; Domain::Ewram.len()],
            iwram: vec![0; Domain::Iwram.len()],
            oam: vec![0; Domain::Oam.len()],
            vram: vec![0; Domain::Vram.len()],
            palette: vec![0; Domain::Palette.len()],
            io: vec![0; Domain::Io.len()],
        }
    }

    fn buffer(&self, domain: Domain) -> &Vec<u8> {
        match domain {
            Domain::Cart => &self.cart,
            Domain::Ewram => &self.ewram,
            Domain::Iwram => &self.iwram,
            Domain::Oam => &self.oam,
            Domain::Vram => &self.vram,
            Domain::Palette => &self.palette,
            Domain::Io => &self.io,
        }
    }

    fn buffer_mut(&mut self, domain: Domain) -> &mut Vec<u8> {
        match domain {
            Domain::Cart => &mut self.cart,
            Domain::Ewram => &mut self.ewram,
            Domain::Iwram => &mut self.iwram,
            Domain::Oam => &mut self.oam,
            Domain::Vram => &mut self.vram,
            Domain::Palette => &mut self.palette,
            Domain::Io => &mut self.io,
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
impl Default for VecMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "test-support"))]
impl MemoryBus for VecMemoryBus {
    fn read_range(&self, domain: Domain, addr: u32, len: usize) -> Result<Vec<u8>, MemoryError> {
        let offset = domain.offset_of(addr, len)?;
        Ok(self.buffer(domain)[offset..offset + len].to_vec())
    }

    fn write_range(&mut self, domain: Domain, addr: u32, data: &[u8]) -> Result<(), MemoryError> {
        let offset = domain.offset_of(addr, data.len())?;
        self.buffer_mut(domain)[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ewram_base_offset_is_zero() {
        assert_eq!(Domain::Ewram.offset_of(0x0200_0000, 1).unwrap(), 0);
    }

    #[test]
    fn ewram_out_of_range_is_rejected() {
        let addr = Domain::Ewram.base_address() + Domain::Ewram.len() as u32 - 1;
        assert!(Domain::Ewram.offset_of(addr, 2).is_err());
    }

    #[test]
    fn address_before_base_is_unmapped() {
        assert!(Domain::Ewram.offset_of(0x0100_0000, 1).is_err());
    }

    #[test]
    fn round_trip_u32_little_endian() {
        let mut bus = VecMemoryBus::new();
        bus.write_u32(Domain::Ewram, 0x0200_1000, 0xDEAD_BEEF).unwrap();
        assert_eq!(bus.read_u32(Domain::Ewram, 0x0200_1000).unwrap(), 0xDEAD_BEEF);
        let raw = bus.read_range(Domain::Ewram, 0x0200_1000, 4).unwrap();
        assert_eq!(raw, vec![0xEF, 0xBE, 0xAD, 0xDE]);
    }

    #[test]
    fn signed_camera_read_reinterprets_high_bit() {
        let mut bus = VecMemoryBus::new();
        bus.write_u16(Domain::Io, 0x0400_0010, 0xFFF0).unwrap(); // -16
        assert_eq!(bus.read_i16(Domain::Io, 0x0400_0010).unwrap(), -16);
    }

    #[test]
    fn failed_read_falls_back_to_default() {
        let bus = VecMemoryBus::new();
        let value = bus.read_u8_or(Domain::Ewram, 0x0100_0000, 42);
        assert_eq!(value, 42);
    }
}
