mod remote_runner;
mod resource_provisioner;
mod result_writer;

pub use remote_runner::RemoteRunner;
pub use resource_provisioner::ResourceProvisioner;
pub use result_writer::ResultWriter;
