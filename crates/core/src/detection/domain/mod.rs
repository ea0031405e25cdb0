pub mod descriptor_smoother;
pub mod face_descriptor;
pub mod face_detector;
pub mod presence_tracker;
pub mod region_expander;
