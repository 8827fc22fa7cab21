//! Safe wrapper over the C libdca decoder.
//!
//! Built with the default single-precision `sample_t` and `level_t`.

#![allow(non_camel_case_types)]

use std::os::raw::c_int;
use std::ptr::NonNull;

use crate::process::decode::{BLOCK_LEN, DcaLibrary, DownmixFlags, SyncInfo};
use crate::utils::errors::DecodeError;

/// Opaque `dca_state_t`.
#[repr(C)]
pub struct dca_state_t {
    _private: [u8; 0],
}

pub type sample_t = f32;
pub type level_t = f32;

/// Channels covered by the sample buffer libdca hands out.
const MAX_CHANNELS: usize = 6;

#[link(name = "dca")]
unsafe extern "C" {
    fn dca_init(mm_accel: u32) -> *mut dca_state_t;

    fn dca_syncinfo(
        state: *mut dca_state_t,
        buf: *mut u8,
        flags: *mut c_int,
        sample_rate: *mut c_int,
        bit_rate: *mut c_int,
        frame_length: *mut c_int,
    ) -> c_int;

    fn dca_frame(
        state: *mut dca_state_t,
        buf: *mut u8,
        flags: *mut c_int,
        level: *mut level_t,
        bias: sample_t,
    ) -> c_int;

    fn dca_blocks_num(state: *mut dca_state_t) -> c_int;

    fn dca_block(state: *mut dca_state_t) -> c_int;

    fn dca_samples(state: *mut dca_state_t) -> *mut sample_t;

    fn dca_free(state: *mut dca_state_t);
}

/// One libdca decoder state.
#[derive(Debug)]
pub struct LibDca {
    state: NonNull<dca_state_t>,
    samples: NonNull<sample_t>,
    scratch: Vec<u8>,
    blocks: usize,
}

// SAFETY: the state is owned by this value and only touched through &mut self.
unsafe impl Send for LibDca {}

impl DcaLibrary for LibDca {
    const HEADER_LEN: usize = 14;

    fn init() -> Result<Self, DecodeError> {
        // SAFETY: dca_init has no preconditions; a null return means failure.
        let state = NonNull::new(unsafe { dca_init(0) }).ok_or(DecodeError::InitFailed)?;
        // SAFETY: state is valid; the buffer lives as long as the state.
        let Some(samples) = NonNull::new(unsafe { dca_samples(state.as_ptr()) }) else {
            // SAFETY: state came from dca_init and is not used again.
            unsafe { dca_free(state.as_ptr()) };
            return Err(DecodeError::InitFailed);
        };

        Ok(Self {
            state,
            samples,
            scratch: Vec::new(),
            blocks: 0,
        })
    }

    fn sync_info(&mut self, data: &[u8]) -> Option<SyncInfo> {
        if data.len() < Self::HEADER_LEN {
            return None;
        }
        self.scratch.clear();
        self.scratch.extend_from_slice(&data[..Self::HEADER_LEN]);

        let mut flags: c_int = 0;
        let mut sample_rate: c_int = 0;
        let mut bit_rate: c_int = 0;
        let mut frame_samples: c_int = 0;
        // SAFETY: scratch holds HEADER_LEN bytes, all out pointers are valid.
        let length = unsafe {
            dca_syncinfo(
                self.state.as_ptr(),
                self.scratch.as_mut_ptr(),
                &mut flags,
                &mut sample_rate,
                &mut bit_rate,
                &mut frame_samples,
            )
        };

        if length <= 0 || sample_rate <= 0 {
            return None;
        }

        Some(SyncInfo {
            frame_length: length as usize,
            sample_rate: sample_rate as u32,
            bit_rate: bit_rate.max(0) as u32,
            flags: DownmixFlags(flags as u32),
        })
    }

    fn frame(
        &mut self,
        data: &[u8],
        flags: &mut DownmixFlags,
        level: &mut f32,
        bias: f32,
    ) -> Result<(), DecodeError> {
        self.blocks = 0;
        self.scratch.clear();
        self.scratch.extend_from_slice(data);

        let mut raw_flags = flags.0 as c_int;
        // SAFETY: scratch holds the whole frame and outlives the call.
        let ret = unsafe {
            dca_frame(
                self.state.as_ptr(),
                self.scratch.as_mut_ptr(),
                &mut raw_flags,
                level,
                bias,
            )
        };
        if ret != 0 {
            return Err(DecodeError::FrameRejected(data.len()));
        }

        *flags = DownmixFlags(raw_flags as u32);
        // SAFETY: state is valid and a frame was just accepted.
        self.blocks = unsafe { dca_blocks_num(self.state.as_ptr()) }.max(0) as usize;
        Ok(())
    }

    fn blocks_num(&self) -> usize {
        self.blocks
    }

    fn block(&mut self) -> Result<(), DecodeError> {
        // SAFETY: state is valid.
        if unsafe { dca_block(self.state.as_ptr()) } != 0 {
            return Err(DecodeError::BlockFailed(0));
        }
        Ok(())
    }

    fn samples(&self) -> &[f32] {
        // SAFETY: libdca allocates 256 samples for each of its six channels
        // together with the state, which lives as long as self.
        unsafe { std::slice::from_raw_parts(self.samples.as_ptr(), BLOCK_LEN * MAX_CHANNELS) }
    }
}

impl Drop for LibDca {
    fn drop(&mut self) {
        // SAFETY: state came from dca_init and is freed exactly once.
        unsafe { dca_free(self.state.as_ptr()) }
    }
}
