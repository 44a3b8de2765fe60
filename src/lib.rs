//! `pushlaunch` provisions a single EC2 instance for a push-notification
//! backend.
//!
//! The flow is strictly linear: load the stored AMI id and file-based
//! credentials, verify them against EC2, interactively pick a name and a
//! placement (VPC, subnet), create a keypair and security group, launch the
//! instance, poll until it is running, tag it, and attach an elastic IP.
//! Every error is fatal except "already exists" conflicts, which prompt for
//! reuse.
//!
//! Most users want the `pushlaunch` binary, but the pieces are usable as a
//! library:
//!
//! ```rust,no_run
//! use pushlaunch::{config, ec2::Provisioner};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), color_eyre::Report> {
//! let creds = config::Credentials::from_file(std::path::Path::new("aws_credentials"))?;
//! let mut prov = Provisioner::new(creds);
//! prov.verify().await?;
//! for vpc in prov.vpcs().await? {
//!     println!("{}", vpc.label());
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod ec2;
pub mod ui;

pub use crate::config::Credentials;
pub use crate::ec2::Provisioner;
