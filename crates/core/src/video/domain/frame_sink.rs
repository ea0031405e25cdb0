use crate::shared::frame::Frame;

/// Receives composited frames in presentation order.
pub trait FrameSink: Send {
    fn present(&mut self, frame: &Frame) -> Result<(), Box<dyn std::error::Error>>;
}
