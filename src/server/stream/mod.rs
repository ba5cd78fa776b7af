mod handler;
mod manager;

pub use handler::stream_notifications;
pub use manager::{
    AdmissionError, StreamLimits, StreamManager, StreamSlot, StreamStats, DEFAULT_GLOBAL_LIMIT,
    DEFAULT_MAX_PER_IP,
};
