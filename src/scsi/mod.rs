//! SCSI passthrough transport over the Linux sg driver.
//!
//! Commands are defined in the `command` module and issued to an open
//! device node with [`SgDevice::send_cdb`]. The raw ioctl ABI lives in
//! the `sg` module; all unsafe pointer handling is confined to the one
//! boundary function here that builds the header, runs the syscall and
//! inspects the completion status.

pub mod command;
pub mod sg;

use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::ptr;

use tracing::trace;

use crate::scsi::command::CommandBlock;
use crate::scsi::sg::{
    DEFAULT_TIMEOUT_MS, SENSE_BUF_LEN, SG_DXFER_FROM_DEV, SG_INFO_OK, SG_INFO_OK_MASK,
    SG_INTERFACE_ID_ORIG, SG_IO, SenseData, SgIoHdr, SgioError,
};

/// An open device node capable of receiving SG_IO requests.
///
/// The handle is owned exclusively by one scan task for its lifetime and
/// closed on drop, on every exit path.
pub struct SgDevice {
    file: File,
}

impl SgDevice {
    /// Opens a device node for passthrough access.
    ///
    /// Read-only is sufficient: SG_IO permission checking is on the file
    /// descriptor mode, and we never write device data.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self { file })
    }

    /// Issues a single command and fills `resp` with the data-in transfer.
    ///
    /// No retries happen at this layer; a failure is reported as-is and
    /// retry policy, if any, belongs to the caller. The call blocks until
    /// the driver completes the command or the fixed per-command timeout
    /// expires.
    pub fn send_cdb(&mut self, cdb: &CommandBlock, resp: &mut [u8]) -> Result<(), SgioError> {
        let mut sense = [0u8; SENSE_BUF_LEN];

        let mut hdr = SgIoHdr {
            interface_id: SG_INTERFACE_ID_ORIG,
            dxfer_direction: SG_DXFER_FROM_DEV,
            cmd_len: cdb.len() as u8,
            mx_sb_len: sense.len() as u8,
            iovec_count: 0,
            dxfer_len: resp.len() as u32,
            dxferp: resp.as_mut_ptr(),
            cmdp: cdb.as_bytes().as_ptr(),
            sbp: sense.as_mut_ptr(),
            timeout: DEFAULT_TIMEOUT_MS,
            flags: 0,
            pack_id: 0,
            usr_ptr: ptr::null_mut(),
            status: 0,
            masked_status: 0,
            msg_status: 0,
            sb_len_wr: 0,
            host_status: 0,
            driver_status: 0,
            resid: 0,
            duration: 0,
            info: 0,
        };

        // SAFETY: `hdr` and the three buffers it points into (`resp`,
        // the CDB, `sense`) are all live for the whole ioctl call, which
        // completes synchronously before any of them can move. The header
        // layout matches sg_io_hdr_t field for field.
        let rc = unsafe { libc::ioctl(self.file.as_raw_fd(), SG_IO, &mut hdr) };
        if rc < 0 {
            return Err(SgioError::Ioctl(io::Error::last_os_error()));
        }

        trace!(
            status = hdr.status,
            duration_ms = hdr.duration,
            resid = hdr.resid,
            "SG_IO completed"
        );

        if hdr.info & SG_INFO_OK_MASK != SG_INFO_OK {
            return Err(SgioError::Command {
                status: hdr.status,
                host_status: hdr.host_status,
                driver_status: hdr.driver_status,
                sense: SenseData::captured(&sense, hdr.sb_len_wr),
            });
        }

        Ok(())
    }
}
