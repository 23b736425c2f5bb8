pub mod rhai_bridge;
