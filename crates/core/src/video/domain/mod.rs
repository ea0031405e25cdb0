pub mod device_registry;
pub mod frame_sink;
pub mod frame_source;
