pub mod backend;
pub mod detection_worker;
pub mod diagnostics;
pub mod session;
pub mod session_config;
pub mod session_observer;
