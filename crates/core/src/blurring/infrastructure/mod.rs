pub mod clip_mask;
pub mod cutout_compositor;
mod gaussian;
