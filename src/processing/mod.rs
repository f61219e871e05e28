pub mod blend;
pub mod decompose;
pub mod depth_layers;
pub mod layout;
pub mod raster;
pub mod shading;
pub mod visual_center;
