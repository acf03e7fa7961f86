mod desired_properties_service;
mod headers;
mod module_input_service;
mod module_output_producer;

pub use desired_properties_service::*;
pub use headers::*;
pub use module_input_service::*;
pub use module_output_producer::*;
