//! EC2 provisioning operations for the push server.
//!
//! [`Provisioner`] wraps a single memoized [`rusoto_ec2::Ec2Client`] built
//! from file-based credentials. Every operation is a thin wrapper over one
//! EC2 call: errors are fatal to the run, except "already exists" conflicts
//! on keypair and security group creation, which are surfaced as
//! [`Created::AlreadyExists`] so the caller can ask the user about reuse.

use crate::config::Credentials;
use color_eyre::eyre::{ensure, eyre, WrapErr};
use color_eyre::Report;
use educe::Educe;
use rusoto_core::credential::StaticProvider;
use rusoto_core::request::HttpClient;
use rusoto_core::RusotoError;
use rusoto_ec2::Ec2;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::time;
use tracing::instrument;

/// UDP port range devices use for push wake-up traffic.
pub const PUSH_UDP_PORTS: (i64, i64) = (5000, 5500);

/// How long to sleep between instance-state polls.
pub const POLL_INTERVAL: time::Duration = time::Duration::from_secs(2);

/// The shared `<app>-push` name used for the keypair, the security group,
/// and the instance `Name` tag.
pub fn push_name(app: &str) -> String {
    format!("{}-push", app)
}

/// Where the private key for `app` is written on first keypair creation.
pub fn pem_file(app: &str) -> PathBuf {
    PathBuf::from(format!("{}-push.pem", app))
}

/// Outcome of an idempotent-by-name create call.
#[derive(Debug)]
pub enum Created<T> {
    /// The resource was created.
    New(T),
    /// A resource with this name already exists; the caller decides whether
    /// to reuse it.
    AlreadyExists,
}

/// A VPC the instance could be placed in.
#[derive(Debug, Clone)]
pub struct VpcChoice {
    pub id: String,
    pub cidr: Option<String>,
    pub is_default: bool,
}

impl VpcChoice {
    pub fn label(&self) -> String {
        let cidr = self.cidr.as_deref().unwrap_or("no cidr");
        if self.is_default {
            format!("{} ({}, default)", self.id, cidr)
        } else {
            format!("{} ({})", self.id, cidr)
        }
    }
}

/// A subnet within the chosen VPC.
#[derive(Debug, Clone)]
pub struct SubnetChoice {
    pub id: String,
    pub availability_zone: Option<String>,
    pub cidr: Option<String>,
}

impl SubnetChoice {
    pub fn label(&self) -> String {
        format!(
            "{} ({}, {})",
            self.id,
            self.availability_zone.as_deref().unwrap_or("unknown az"),
            self.cidr.as_deref().unwrap_or("no cidr"),
        )
    }
}

/// A freshly created keypair, with its private key on disk.
#[derive(Debug)]
pub struct KeyPair {
    pub name: String,
    pub pem_path: PathBuf,
}

/// Everything `run_instance` needs.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub ami: String,
    pub instance_type: String,
    pub subnet_id: String,
    pub key_name: String,
    pub security_group_id: String,
}

/// Addresses of a running instance, as reported by DescribeInstances.
#[derive(Debug, Clone, PartialEq)]
pub struct IpInfo {
    pub public_ip: Option<String>,
    pub public_dns: Option<String>,
    pub private_ip: Option<String>,
}

/// An allocated elastic IP.
#[derive(Debug, Clone)]
pub struct ElasticIp {
    pub allocation_id: String,
    pub public_ip: String,
}

/// Provisions the push server's EC2 resources.
///
/// The client is constructed lazily on first use and memoized; call
/// [`Provisioner::verify`] early to fail fast on bad credentials.
#[derive(Educe)]
#[educe(Debug)]
pub struct Provisioner {
    credentials: Credentials,
    #[educe(Debug(ignore))]
    client: Option<rusoto_ec2::Ec2Client>,
}

impl Provisioner {
    pub fn new(credentials: Credentials) -> Self {
        Provisioner {
            credentials,
            client: None,
        }
    }

    pub fn region(&self) -> &rusoto_core::Region {
        &self.credentials.region
    }

    fn client(&mut self) -> Result<rusoto_ec2::Ec2Client, Report> {
        if self.client.is_none() {
            tracing::debug!(region = %self.credentials.region.name(), "connecting to ec2");
            let provider = StaticProvider::new_minimal(
                self.credentials.access_key_id.clone(),
                self.credentials.secret_access_key.clone(),
            );
            let ec2 = rusoto_ec2::Ec2Client::new_with(
                HttpClient::new().wrap_err("failed to construct new http client")?,
                provider,
                self.credentials.region.clone(),
            );
            self.client = Some(ec2);
        }
        // Ec2Client is internally reference-counted; clones share the one
        // connection pool.
        Ok(self.client.as_ref().expect("initialized above").clone())
    }

    /// Check the credentials with a cheap read-only call.
    #[instrument(level = "debug", skip(self))]
    pub async fn verify(&mut self) -> Result<(), Report> {
        let ec2 = self.client()?;
        ec2.describe_regions(rusoto_ec2::DescribeRegionsRequest::default())
            .await
            .wrap_err("credential check against ec2 failed")?;
        tracing::debug!("credentials verified");
        Ok(())
    }

    /// Enumerate the VPCs the instance could be placed in.
    #[instrument(level = "debug", skip(self))]
    pub async fn vpcs(&mut self) -> Result<Vec<VpcChoice>, Report> {
        let ec2 = self.client()?;
        let res = ec2
            .describe_vpcs(rusoto_ec2::DescribeVpcsRequest::default())
            .await
            .wrap_err("failed to describe vpcs")?;

        let vpcs: Vec<_> = res
            .vpcs
            .unwrap_or_else(Vec::new)
            .into_iter()
            .filter_map(|vpc| {
                Some(VpcChoice {
                    id: vpc.vpc_id?,
                    cidr: vpc.cidr_block,
                    is_default: vpc.is_default.unwrap_or(false),
                })
            })
            .collect();
        ensure!(
            !vpcs.is_empty(),
            "no VPCs visible in region {}",
            self.credentials.region.name()
        );
        Ok(vpcs)
    }

    /// Enumerate the subnets of `vpc_id`.
    #[instrument(level = "debug", skip(self))]
    pub async fn subnets(&mut self, vpc_id: &str) -> Result<Vec<SubnetChoice>, Report> {
        let ec2 = self.client()?;
        let mut req = rusoto_ec2::DescribeSubnetsRequest::default();
        req.filters = Some(vec![rusoto_ec2::Filter {
            name: Some("vpc-id".to_string()),
            values: Some(vec![vpc_id.to_string()]),
        }]);
        let res = ec2
            .describe_subnets(req)
            .await
            .wrap_err("failed to describe subnets")?;

        let subnets: Vec<_> = res
            .subnets
            .unwrap_or_else(Vec::new)
            .into_iter()
            .filter_map(|s| {
                Some(SubnetChoice {
                    id: s.subnet_id?,
                    availability_zone: s.availability_zone,
                    cidr: s.cidr_block,
                })
            })
            .collect();
        ensure!(!subnets.is_empty(), "no subnets in vpc {}", vpc_id);
        Ok(subnets)
    }

    /// Create the `<app>-push` keypair and write its private key next to the
    /// invocation, once.
    ///
    /// A name conflict is not an error: it returns
    /// [`Created::AlreadyExists`], and no key file is written (AWS only
    /// hands out key material on creation).
    #[instrument(level = "debug", skip(self))]
    pub async fn create_key_pair(&mut self, app: &str) -> Result<Created<KeyPair>, Report> {
        let ec2 = self.client()?;
        let key_name = push_name(app);
        tracing::debug!(name = %key_name, "creating keypair");
        let mut req = rusoto_ec2::CreateKeyPairRequest::default();
        req.key_name = key_name.clone();
        let res = match ec2.create_key_pair(req).await {
            Ok(res) => res,
            Err(RusotoError::Unknown(r))
                if r.body_as_str().contains("InvalidKeyPair.Duplicate") =>
            {
                tracing::debug!(name = %key_name, "keypair already exists");
                return Ok(Created::AlreadyExists);
            }
            Err(e) => return Err(e).wrap_err("failed to create key pair"),
        };
        tracing::trace!(fingerprint = ?res.key_fingerprint, "created keypair");

        let private_key = res
            .key_material
            .expect("aws did not return key material for new key");
        let pem_path = pem_file(app);
        let mut f = fs::File::create(&pem_path)
            .wrap_err_with(|| format!("could not create key file '{}'", pem_path.display()))?;
        f.write_all(private_key.as_bytes())
            .wrap_err("could not write private key to file")?;
        tracing::debug!(filename = %pem_path.display(), "wrote private key");

        Ok(Created::New(KeyPair {
            name: key_name,
            pem_path,
        }))
    }

    /// Create the `<app>-push` security group in `vpc_id` and add its fixed
    /// ingress rules: SSH, HTTPS, and the push UDP range, all from anywhere.
    ///
    /// On a name conflict no ingress calls are made; the existing group is
    /// assumed to carry its rules already.
    #[instrument(level = "debug", skip(self))]
    pub async fn create_security_group(
        &mut self,
        app: &str,
        vpc_id: &str,
    ) -> Result<Created<String>, Report> {
        let ec2 = self.client()?;
        let group_name = push_name(app);
        tracing::debug!(name = %group_name, %vpc_id, "creating security group");
        let mut req = rusoto_ec2::CreateSecurityGroupRequest::default();
        req.group_name = group_name.clone();
        req.description = format!("push server access for {}", app);
        req.vpc_id = Some(vpc_id.to_string());
        let res = match ec2.create_security_group(req).await {
            Ok(res) => res,
            Err(RusotoError::Unknown(r)) if r.body_as_str().contains("InvalidGroup.Duplicate") => {
                tracing::debug!(name = %group_name, "security group already exists");
                return Ok(Created::AlreadyExists);
            }
            Err(e) => return Err(e).wrap_err("failed to create security group"),
        };
        let group_id = res
            .group_id
            .expect("aws created security group with no group id");
        tracing::trace!(id = %group_id, "security group created");

        let mut req = rusoto_ec2::AuthorizeSecurityGroupIngressRequest::default();
        req.group_id = Some(group_id.clone());
        req.cidr_ip = Some("0.0.0.0/0".to_string());

        // ssh access
        req.ip_protocol = Some("tcp".to_string());
        req.from_port = Some(22);
        req.to_port = Some(22);
        tracing::trace!("adding ssh access");
        ec2.authorize_security_group_ingress(req.clone())
            .await
            .wrap_err("failed to add ssh ingress rule")?;

        // https to the push api
        req.from_port = Some(443);
        req.to_port = Some(443);
        tracing::trace!("adding https access");
        ec2.authorize_security_group_ingress(req.clone())
            .await
            .wrap_err("failed to add https ingress rule")?;

        // device wake-up datagrams
        req.ip_protocol = Some("udp".to_string());
        req.from_port = Some(PUSH_UDP_PORTS.0);
        req.to_port = Some(PUSH_UDP_PORTS.1);
        tracing::trace!("adding push udp access");
        ec2.authorize_security_group_ingress(req)
            .await
            .wrap_err("failed to add push udp ingress rule")?;

        Ok(Created::New(group_id))
    }

    /// Look up the id of an existing `<app>-push` group in `vpc_id`, for
    /// confirmed reuse.
    #[instrument(level = "debug", skip(self))]
    pub async fn find_security_group(&mut self, app: &str, vpc_id: &str) -> Result<String, Report> {
        let ec2 = self.client()?;
        let group_name = push_name(app);
        let mut req = rusoto_ec2::DescribeSecurityGroupsRequest::default();
        req.filters = Some(vec![
            rusoto_ec2::Filter {
                name: Some("group-name".to_string()),
                values: Some(vec![group_name.clone()]),
            },
            rusoto_ec2::Filter {
                name: Some("vpc-id".to_string()),
                values: Some(vec![vpc_id.to_string()]),
            },
        ]);
        let res = ec2
            .describe_security_groups(req)
            .await
            .wrap_err("failed to describe security groups")?;
        res.security_groups
            .unwrap_or_else(Vec::new)
            .into_iter()
            .filter_map(|g| g.group_id)
            .next()
            .ok_or_else(|| eyre!("security group '{}' not found in vpc {}", group_name, vpc_id))
    }

    /// Launch exactly one instance.
    #[instrument(level = "debug", skip(self))]
    pub async fn run_instance(&mut self, spec: &LaunchSpec) -> Result<String, Report> {
        let ec2 = self.client()?;
        tracing::debug!(ami = %spec.ami, instance_type = %spec.instance_type, "launching instance");
        let req = rusoto_ec2::RunInstancesRequest {
            image_id: Some(spec.ami.clone()),
            instance_type: Some(spec.instance_type.clone()),
            key_name: Some(spec.key_name.clone()),
            security_group_ids: Some(vec![spec.security_group_id.clone()]),
            subnet_id: Some(spec.subnet_id.clone()),
            min_count: 1,
            max_count: 1,
            ..Default::default()
        };
        let res = ec2
            .run_instances(req)
            .await
            .wrap_err("failed to run instance")?;
        let instance_id = res
            .instances
            .unwrap_or_else(Vec::new)
            .into_iter()
            .filter_map(|i| i.instance_id)
            .next()
            .ok_or_else(|| eyre!("run_instances returned no instances"))?;
        tracing::debug!(%instance_id, "instance launched");
        Ok(instance_id)
    }

    /// Poll DescribeInstances at a fixed interval until the instance reports
    /// state "running". There is no timeout; a failed launch surfaces as an
    /// API error, not as a state we watch for.
    #[instrument(level = "debug", skip(self))]
    pub async fn wait_until_running(&mut self, instance_id: &str) -> Result<IpInfo, Report> {
        let ec2 = self.client()?;
        let mut req = rusoto_ec2::DescribeInstancesRequest::default();
        req.instance_ids = Some(vec![instance_id.to_string()]);
        loop {
            tracing::trace!("checking instance state");
            for reservation in ec2
                .describe_instances(req.clone())
                .await
                .wrap_err("could not query aws for instance state")?
                .reservations
                .unwrap_or_else(Vec::new)
            {
                for instance in reservation.instances.unwrap_or_else(Vec::new) {
                    if let Some(info) = running_ip_info(&instance) {
                        tracing::debug!(ip = ?info.public_ip, "instance running");
                        return Ok(info);
                    }
                }
            }

            // let's not hammer the API
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Tag the instance with a human-readable `Name`.
    #[instrument(level = "debug", skip(self))]
    pub async fn tag_instance(&mut self, instance_id: &str, name: &str) -> Result<(), Report> {
        let ec2 = self.client()?;
        tracing::debug!(%instance_id, %name, "tagging instance");
        let req = rusoto_ec2::CreateTagsRequest {
            resources: vec![instance_id.to_string()],
            tags: vec![rusoto_ec2::Tag {
                key: Some("Name".to_string()),
                value: Some(name.to_string()),
            }],
            ..Default::default()
        };
        ec2.create_tags(req)
            .await
            .wrap_err("failed to tag instance")?;
        Ok(())
    }

    /// Allocate a VPC elastic IP.
    #[instrument(level = "debug", skip(self))]
    pub async fn allocate_address(&mut self) -> Result<ElasticIp, Report> {
        let ec2 = self.client()?;
        tracing::debug!("allocating elastic ip");
        let mut req = rusoto_ec2::AllocateAddressRequest::default();
        req.domain = Some("vpc".to_string());
        let res = ec2
            .allocate_address(req)
            .await
            .wrap_err("failed to allocate elastic ip")?;
        let allocation_id = res
            .allocation_id
            .ok_or_else(|| eyre!("allocated address has no allocation id"))?;
        let public_ip = res
            .public_ip
            .ok_or_else(|| eyre!("allocated address has no public ip"))?;
        tracing::debug!(%allocation_id, %public_ip, "elastic ip allocated");
        Ok(ElasticIp {
            allocation_id,
            public_ip,
        })
    }

    /// Attach an allocated elastic IP to the instance.
    #[instrument(level = "debug", skip(self))]
    pub async fn associate_address(
        &mut self,
        eip: &ElasticIp,
        instance_id: &str,
    ) -> Result<String, Report> {
        let ec2 = self.client()?;
        tracing::debug!(allocation = %eip.allocation_id, %instance_id, "associating elastic ip");
        let mut req = rusoto_ec2::AssociateAddressRequest::default();
        req.allocation_id = Some(eip.allocation_id.clone());
        req.instance_id = Some(instance_id.to_string());
        let res = ec2
            .associate_address(req)
            .await
            .wrap_err("failed to associate elastic ip")?;
        res.association_id
            .ok_or_else(|| eyre!("associate_address returned no association id"))
    }
}

/// The instance's addresses if and only if it is running.
///
/// https://docs.aws.amazon.com/AWSEC2/latest/APIReference/API_InstanceState.html
/// code 16 means "running"; everything else (pending, stopping, terminated,
/// ...) keeps the poll going.
pub fn running_ip_info(instance: &rusoto_ec2::Instance) -> Option<IpInfo> {
    match instance {
        rusoto_ec2::Instance {
            state: Some(rusoto_ec2::InstanceState { code: Some(16), .. }),
            ..
        } => Some(IpInfo {
            public_ip: instance.public_ip_address.clone(),
            public_dns: instance.public_dns_name.clone(),
            private_ip: instance.private_ip_address.clone(),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn instance_in_state(code: i64) -> rusoto_ec2::Instance {
        rusoto_ec2::Instance {
            instance_id: Some("i-0123456789abcdef0".to_string()),
            state: Some(rusoto_ec2::InstanceState {
                code: Some(code),
                ..Default::default()
            }),
            private_ip_address: Some("172.31.0.17".to_string()),
            public_ip_address: Some("203.0.113.8".to_string()),
            public_dns_name: Some("ec2-203-0-113-8.compute-1.amazonaws.com".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn ready_exactly_on_running() {
        // lifecycle codes: 0 pending, 16 running, 32 shutting-down,
        // 48 terminated, 64 stopping, 80 stopped
        for &code in &[0, 32, 48, 64, 80] {
            assert!(running_ip_info(&instance_in_state(code)).is_none());
        }

        let info = running_ip_info(&instance_in_state(16)).unwrap();
        assert_eq!(info.public_ip.as_deref(), Some("203.0.113.8"));
        assert_eq!(info.private_ip.as_deref(), Some("172.31.0.17"));
    }

    #[test]
    fn not_ready_without_state() {
        let instance = rusoto_ec2::Instance {
            instance_id: Some("i-0123456789abcdef0".to_string()),
            ..Default::default()
        };
        assert!(running_ip_info(&instance).is_none());
    }

    #[test]
    fn derived_names() {
        assert_eq!(push_name("chirp"), "chirp-push");
        assert_eq!(pem_file("chirp"), PathBuf::from("chirp-push.pem"));
    }

    #[tokio::test]
    #[ignore]
    async fn verify_live() -> Result<(), Report> {
        let credentials = crate::config::Credentials::from_file(std::path::Path::new(
            crate::config::CREDENTIALS_FILE,
        ))?;
        let mut prov = Provisioner::new(credentials);
        prov.verify().await
    }
}
