use crate::shared::errors::CompositingError;
use crate::shared::frame::Frame;
use crate::shared::region::Region;

/// Domain interface for producing the privacy-filtered output frame.
///
/// The input frame is never modified; the result is a new frame with the
/// same dimensions, layout, index and timestamp. With no region the whole
/// frame is filtered.
pub trait FrameCompositor: Send {
    fn composite(&self, frame: &Frame, region: Option<&Region>) -> Result<Frame, CompositingError>;
}
