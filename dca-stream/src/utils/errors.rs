/// Logs `$err` at `$level`, or returns it when `$level` is at or above the
/// fail level carried by `$state`.
#[macro_export]
macro_rules! log_or_err {
    ($state:expr, $level:expr, $err:expr $(,)?) => {{
        if $level <= $state.fail_level {
            return Err($err.into());
        } else {
            match $level {
                ::log::Level::Error => ::log::error!("{}", $err),
                ::log::Level::Warn => ::log::warn!("{}", $err),
                ::log::Level::Info => ::log::info!("{}", $err),
                ::log::Level::Debug => ::log::debug!("{}", $err),
                ::log::Level::Trace => ::log::trace!("{}", $err),
            }
        }
    }};
}

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("Decoder state allocation failed")]
    InitFailed,

    #[error("Downmix to {0} channels is not supported")]
    UnsupportedChannels(usize),

    #[error("dca_frame rejected a {0} byte frame")]
    FrameRejected(usize),

    #[error("dca_block failed for block {0}")]
    BlockFailed(usize),

    #[error("Block {index} requested but the frame has only {blocks} blocks")]
    BlockOverrun { index: usize, blocks: usize },

    #[error("Sample buffer holds {actual} samples, block needs {needed}")]
    ShortSampleBuffer { needed: usize, actual: usize },
}

#[derive(thiserror::Error, Debug)]
pub enum PacketizeError {
    #[error("Cannot allocate a {size} byte LPCM packet")]
    Allocation {
        size: usize,
        #[source]
        source: std::collections::TryReserveError,
    },

    #[error("Sample rate must be non-zero")]
    InvalidSampleRate,

    #[error("Cannot write LPCM header field")]
    Header(#[from] std::io::Error),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}
