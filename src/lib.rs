pub mod capture;
pub mod config;
pub mod error;
pub mod events;
pub mod motion;
pub mod placement;
pub mod processing;
pub mod render;
pub mod tasks {
    pub mod camera;
    pub mod control;
    pub mod preview;
    pub mod viewer;
}
