pub mod session_controller;

pub use session_controller::{
    ControllerArgs, ControllerMessage, LoadObserver, SessionController, StargazerController,
};
