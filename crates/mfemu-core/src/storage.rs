use core::sync::atomic::{AtomicU8, Ordering};

use thiserror::Error;

/// Access-control bits of a storage key.
pub const STORKEY_KEY: u8 = 0xF0;
/// Fetch-protection bit.
pub const STORKEY_FETCH: u8 = 0x08;
/// Reference bit.
pub const STORKEY_REF: u8 = 0x04;
/// Change bit.
pub const STORKEY_CHANGE: u8 = 0x02;

/// Bytes of absolute storage covered by one storage key.
pub const STORAGE_KEY_FRAME_SIZE: u64 = 4096;
const STORAGE_KEY_FRAME_SHIFT: u32 = 12;

/// Errors returned by [`MainStorage`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// The requested absolute range lies (partly) beyond the configured storage.
    #[error("main storage access out of range: addr=0x{addr:x} len={len} size=0x{size:x}")]
    OutOfRange { addr: u64, len: usize, size: u64 },

    /// The requested size cannot be represented by the current platform's `usize`.
    #[error("main storage size {size} does not fit in usize")]
    SizeTooLarge { size: u64 },

    /// Main storage must be a non-zero whole number of storage-key frames.
    #[error("main storage size 0x{size:x} is not a non-zero multiple of 0x{frame:x}")]
    InvalidSize { size: u64, frame: u64 },
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Guest absolute ("main") storage and its storage keys.
///
/// Every CPU reads and writes the same arena concurrently. The bytes are `AtomicU8` so that
/// those accesses are plain relaxed loads/stores rather than data races; the emulated machine
/// gets its ordering guarantees from the transactional cache-line status words, not from this
/// type. All addresses are absolute byte offsets and every access is bounds-checked.
pub struct MainStorage {
    bytes: Box<[AtomicU8]>,
    keys: Box<[AtomicU8]>,
    size: u64,
}

impl core::fmt::Debug for MainStorage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MainStorage")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl MainStorage {
    /// Allocate zeroed storage of `size` bytes with all storage keys zero.
    pub fn new(size: u64) -> StorageResult<Self> {
        if size == 0 || size % STORAGE_KEY_FRAME_SIZE != 0 {
            return Err(StorageError::InvalidSize {
                size,
                frame: STORAGE_KEY_FRAME_SIZE,
            });
        }
        let size_usize = usize::try_from(size).map_err(|_| StorageError::SizeTooLarge { size })?;
        let frames = size_usize >> STORAGE_KEY_FRAME_SHIFT;
        Ok(Self {
            bytes: (0..size_usize).map(|_| AtomicU8::new(0)).collect(),
            keys: (0..frames).map(|_| AtomicU8::new(0)).collect(),
            size,
        })
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Highest valid absolute address (`mainlim`).
    #[inline]
    pub fn limit(&self) -> u64 {
        self.size - 1
    }

    /// Whether `[addr, addr + len)` lies entirely within storage.
    #[inline]
    pub fn contains(&self, addr: u64, len: usize) -> bool {
        self.check_range(addr, len).is_ok()
    }

    #[inline]
    fn check_range(&self, addr: u64, len: usize) -> StorageResult<usize> {
        let out_of_range = || StorageError::OutOfRange {
            addr,
            len,
            size: self.size,
        };
        let end = addr.checked_add(len as u64).ok_or_else(out_of_range)?;
        if end > self.size {
            return Err(out_of_range());
        }
        // `size` fits in usize (checked at construction) and `addr < end <= size`.
        Ok(addr as usize)
    }

    pub fn read_into(&self, addr: u64, dst: &mut [u8]) -> StorageResult<()> {
        let start = self.check_range(addr, dst.len())?;
        for (slot, byte) in dst.iter_mut().zip(&self.bytes[start..]) {
            *slot = byte.load(Ordering::Relaxed);
        }
        Ok(())
    }

    pub fn write_from(&self, addr: u64, src: &[u8]) -> StorageResult<()> {
        let start = self.check_range(addr, src.len())?;
        for (byte, value) in self.bytes[start..].iter().zip(src.iter().copied()) {
            byte.store(value, Ordering::Relaxed);
        }
        Ok(())
    }

    pub fn read_u8(&self, addr: u64) -> StorageResult<u8> {
        let mut buf = [0u8; 1];
        self.read_into(addr, &mut buf)?;
        Ok(buf[0])
    }

    pub fn write_u8(&self, addr: u64, value: u8) -> StorageResult<()> {
        self.write_from(addr, &[value])
    }

    pub fn read_u32_be(&self, addr: u64) -> StorageResult<u32> {
        let mut buf = [0u8; 4];
        self.read_into(addr, &mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    pub fn write_u32_be(&self, addr: u64, value: u32) -> StorageResult<()> {
        self.write_from(addr, &value.to_be_bytes())
    }

    pub fn read_u64_be(&self, addr: u64) -> StorageResult<u64> {
        let mut buf = [0u8; 8];
        self.read_into(addr, &mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }

    pub fn write_u64_be(&self, addr: u64, value: u64) -> StorageResult<()> {
        self.write_from(addr, &value.to_be_bytes())
    }

    #[inline]
    fn key_slot(&self, addr: u64) -> StorageResult<&AtomicU8> {
        self.check_range(addr, 1)?;
        Ok(&self.keys[(addr >> STORAGE_KEY_FRAME_SHIFT) as usize])
    }

    /// Storage key of the 4K frame containing `addr`.
    pub fn get_storage_key(&self, addr: u64) -> StorageResult<u8> {
        Ok(self.key_slot(addr)?.load(Ordering::Acquire))
    }

    /// Replace the storage key of the frame containing `addr`.
    pub fn set_storage_key(&self, addr: u64, key: u8) -> StorageResult<()> {
        self.key_slot(addr)?.store(key, Ordering::Release);
        Ok(())
    }

    /// OR reference/change bits into the key of the frame containing `addr`.
    ///
    /// Returns the previous key.
    pub fn or_storage_key(&self, addr: u64, bits: u8) -> StorageResult<u8> {
        Ok(self.key_slot(addr)?.fetch_or(bits, Ordering::AcqRel))
    }

    /// Clear bits in the key of the frame containing `addr`.
    ///
    /// Returns the previous key.
    pub fn and_storage_key(&self, addr: u64, mask: u8) -> StorageResult<u8> {
        Ok(self.key_slot(addr)?.fetch_and(mask, Ordering::AcqRel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_sizes_that_are_not_whole_frames() {
        assert_eq!(
            MainStorage::new(0).unwrap_err(),
            StorageError::InvalidSize {
                size: 0,
                frame: STORAGE_KEY_FRAME_SIZE
            }
        );
        assert!(matches!(
            MainStorage::new(0x1800),
            Err(StorageError::InvalidSize { .. })
        ));
    }

    #[test]
    fn big_endian_accessors_round_trip_at_the_last_word() {
        let storage = MainStorage::new(0x2000).unwrap();
        assert_eq!(storage.limit(), 0x1fff);

        storage.write_u32_be(0x1ffc, 0x1122_3344).unwrap();
        assert_eq!(storage.read_u8(0x1ffc).unwrap(), 0x11);
        assert_eq!(storage.read_u8(0x1fff).unwrap(), 0x44);
        assert_eq!(storage.read_u32_be(0x1ffc).unwrap(), 0x1122_3344);

        storage.write_u64_be(0x100, 0x0102_0304_0506_0708).unwrap();
        assert_eq!(storage.read_u64_be(0x100).unwrap(), 0x0102_0304_0506_0708);
    }

    #[test]
    fn accesses_crossing_the_end_are_rejected_without_partial_writes() {
        let storage = MainStorage::new(0x1000).unwrap();
        let err = storage.write_u32_be(0xffe, 0xffff_ffff).unwrap_err();
        assert_eq!(
            err,
            StorageError::OutOfRange {
                addr: 0xffe,
                len: 4,
                size: 0x1000
            }
        );
        assert_eq!(storage.read_u8(0xffe).unwrap(), 0);
        assert!(!storage.contains(u64::MAX, 2));
        assert!(storage.contains(0, 0x1000));
    }

    #[test]
    fn storage_keys_are_per_4k_frame() {
        let storage = MainStorage::new(0x3000).unwrap();
        storage.set_storage_key(0x1000, 0x30).unwrap();

        assert_eq!(storage.or_storage_key(0x1fff, STORKEY_REF).unwrap(), 0x30);
        assert_eq!(storage.get_storage_key(0x1800).unwrap(), 0x30 | STORKEY_REF);
        assert_eq!(storage.get_storage_key(0x0fff).unwrap(), 0);
        assert_eq!(storage.get_storage_key(0x2000).unwrap(), 0);

        storage.and_storage_key(0x1000, !STORKEY_REF).unwrap();
        assert_eq!(storage.get_storage_key(0x1000).unwrap(), 0x30);
        assert!(storage.get_storage_key(0x3000).is_err());
    }

    #[cfg(not(target_arch = "wasm32"))]
    mod prop {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn writes_succeed_exactly_when_the_range_fits(addr in 0u64..0x2100, len in 0usize..0x200) {
                let storage = MainStorage::new(0x2000).unwrap();
                let src = vec![0xa5u8; len];
                let fits = addr + len as u64 <= 0x2000;

                prop_assert_eq!(storage.contains(addr, len), fits);
                prop_assert_eq!(storage.write_from(addr, &src).is_ok(), fits);
                if fits {
                    let mut dst = vec![0u8; len];
                    storage.read_into(addr, &mut dst).unwrap();
                    prop_assert_eq!(dst, src);
                }
            }
        }
    }
}
