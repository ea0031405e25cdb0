pub mod interval_face_detector;
pub mod model_resolver;
pub mod onnx_blazeface_detector;
pub mod renderer_message_detector;
pub mod replay_face_detector;
pub mod tracking_face_detector;
