//! Collaborator boundary: sensor source and actuator port traits, the CSV
//! record/error sinks, the plot renderer, and the simulated rig.

pub mod actuator_port;
pub mod log_sink;
pub mod plot_sink;
pub mod sensor;
pub mod sim;
