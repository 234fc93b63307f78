//! Real-hardware backend skeleton (Windows tape device via `CreateFileA` +
//! `DeviceIoControl`). SCSI CDB encoding is an out-of-scope external
//! collaborator, so this backend only goes as far as opening the device
//! handle and querying readiness; the I/O methods return `Unsupported`
//! until a real CDB layer is plugged in underneath.

use super::{
    DriveInfo, LoadOption, MamAttribute, MediaType, SpaceState, TapeBackend, TapePosition,
    WriteProtectFlags,
};
use crate::error::{Result, RustLtfsError};
use std::ffi::CString;
use std::ptr;
use winapi::shared::minwindef::DWORD;
use winapi::um::fileapi::{CreateFileA, OPEN_EXISTING};
use winapi::um::handleapi::{CloseHandle, INVALID_HANDLE_VALUE};
use winapi::um::winnt::{GENERIC_READ, GENERIC_WRITE, HANDLE};

pub struct HardwareBackend {
    device_path: String,
    handle: HANDLE,
}

unsafe impl Send for HardwareBackend {}

impl HardwareBackend {
    pub fn new(device_path: impl Into<String>) -> Self {
        Self {
            device_path: device_path.into(),
            handle: INVALID_HANDLE_VALUE,
        }
    }
}

impl TapeBackend for HardwareBackend {
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }

    fn open(&mut self) -> Result<()> {
        let path = CString::new(self.device_path.clone())
            .map_err(|e| RustLtfsError::tape_device(e.to_string()))?;
        let handle = unsafe {
            CreateFileA(
                path.as_ptr(),
                GENERIC_READ | GENERIC_WRITE,
                0,
                ptr::null_mut(),
                OPEN_EXISTING,
                0 as DWORD,
                ptr::null_mut(),
            )
        };
        if handle == INVALID_HANDLE_VALUE {
            return Err(RustLtfsError::DeviceUnready(self.device_path.clone()));
        }
        self.handle = handle;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.handle != INVALID_HANDLE_VALUE {
            unsafe { CloseHandle(self.handle) };
            self.handle = INVALID_HANDLE_VALUE;
        }
        Ok(())
    }

    fn is_ready(&self) -> Result<bool> {
        Ok(self.handle != INVALID_HANDLE_VALUE)
    }

    fn position(&self, _partition: u8) -> Result<TapePosition> {
        Err(RustLtfsError::unsupported("SCSI READ POSITION not wired up"))
    }
    fn seek(&mut self, _partition: u8, _block: u64) -> Result<()> {
        Err(RustLtfsError::unsupported("SCSI LOCATE not wired up"))
    }
    fn seek_eod(&mut self, _partition: u8) -> Result<u64> {
        Err(RustLtfsError::unsupported("SCSI LOCATE EOD not wired up"))
    }
    fn space_filemarks(&mut self, _partition: u8, _n: i64) -> Result<()> {
        Err(RustLtfsError::unsupported("SCSI SPACE not wired up"))
    }
    fn read_block(&mut self, _partition: u8, _buf: &mut Vec<u8>) -> Result<usize> {
        Err(RustLtfsError::unsupported("SCSI READ not wired up"))
    }
    fn write_block(&mut self, _partition: u8, _data: &[u8]) -> Result<()> {
        Err(RustLtfsError::unsupported("SCSI WRITE not wired up"))
    }
    fn write_filemark(&mut self, _partition: u8, _count: u32, _immediate: bool) -> Result<()> {
        Err(RustLtfsError::unsupported("SCSI WRITE FILEMARKS not wired up"))
    }
    fn append_position(&self, _partition: u8) -> u64 {
        0
    }
    fn set_append_position(&mut self, _partition: u8, _block: u64) {}
    fn space_state(&self, _partition: u8) -> SpaceState {
        SpaceState::Writable
    }
    fn write_protect_flags(&self, _partition: u8) -> WriteProtectFlags {
        WriteProtectFlags::empty()
    }
    fn set_force_read_only(&mut self, _partition: u8, _on: bool) {}
    fn read_mam_attribute(&self, _partition: u8, _id: u16) -> Result<Option<MamAttribute>> {
        Err(RustLtfsError::unsupported("SCSI READ ATTRIBUTE not wired up"))
    }
    fn write_mam_attribute(&mut self, _partition: u8, _attr: MamAttribute) -> Result<()> {
        Err(RustLtfsError::unsupported("SCSI WRITE ATTRIBUTE not wired up"))
    }
    fn load(&mut self, _option: LoadOption) -> Result<()> {
        Err(RustLtfsError::unsupported("SCSI LOAD/UNLOAD not wired up"))
    }
    fn unload(&mut self) -> Result<()> {
        Err(RustLtfsError::unsupported("SCSI LOAD/UNLOAD not wired up"))
    }
    fn reserve_unit(&mut self) -> Result<()> {
        Err(RustLtfsError::unsupported("SCSI RESERVE not wired up"))
    }
    fn release_unit(&mut self) -> Result<()> {
        Err(RustLtfsError::unsupported("SCSI RELEASE not wired up"))
    }
    fn erase_partition(&mut self, _partition: u8) -> Result<()> {
        Err(RustLtfsError::unsupported("SCSI ERASE not wired up"))
    }
    fn capacity_bytes(&self, _partition: u8) -> u64 {
        0
    }
    fn media_type(&self) -> MediaType {
        MediaType::NoTape
    }
    fn drive_info(&self) -> DriveInfo {
        DriveInfo {
            vendor_id: String::new(),
            product_id: String::new(),
            serial_number: String::new(),
            device_path: self.device_path.clone(),
        }
    }
    fn has_eod(&self, _partition: u8) -> Result<bool> {
        Err(RustLtfsError::unsupported("SCSI READ POSITION not wired up"))
    }
    fn reconstruct_eod_at(&mut self, _partition: u8, _block: u64) -> Result<()> {
        Err(RustLtfsError::unsupported("SCSI ERASE/WRITE EOD not wired up"))
    }
}

impl Drop for HardwareBackend {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
