pub mod channel_gc;
pub mod presence_sweep;

pub use channel_gc::ChannelGcWorker;
pub use presence_sweep::PresenceSweepWorker;
