pub mod config;
pub mod db;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod report;
pub mod resource;
pub mod zr;
