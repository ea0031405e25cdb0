pub mod image_file_sink;
pub mod image_sequence_source;
#[cfg(feature = "camera-nokhwa")]
pub mod nokhwa_camera_source;
pub mod polling_frame_source;
pub mod still_encoder;
