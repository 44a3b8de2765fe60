use color_eyre::eyre::WrapErr;
use color_eyre::Report;
use console::style;
use indicatif::ProgressBar;
use pushlaunch::config;
use pushlaunch::ec2::{self, Created, LaunchSpec, Provisioner};
use pushlaunch::ui;
use std::path::{Path, PathBuf};
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "pushlaunch",
    about = "Provision an EC2 instance for the push server."
)]
struct Opt {
    /// File holding the AMI id to launch.
    #[structopt(long = "ami-file", default_value = "ami_id", parse(from_os_str))]
    ami_file: PathBuf,

    /// File holding the AWS credentials.
    #[structopt(
        long = "credentials-file",
        default_value = "aws_credentials",
        parse(from_os_str)
    )]
    credentials_file: PathBuf,

    /// EC2 instance type to launch.
    #[structopt(short = "t", long = "instance-type", default_value = "t2.micro")]
    instance_type: String,
}

#[tokio::main]
async fn main() -> Result<(), Report> {
    color_eyre::install()?;
    tracing_subscriber::fmt::init();

    let opt = Opt::from_args();
    let mut prompt = ui::Interactive::default();

    let ami = config::load_ami_id(&opt.ami_file)?;
    let credentials = config::Credentials::from_file(&opt.credentials_file)?;

    let mut prov = Provisioner::new(credentials);
    prov.verify()
        .await
        .wrap_err("could not authenticate against aws")?;
    println!(
        "Authenticated against EC2 in {}; launching {} from {}",
        style(prov.region().name()).cyan(),
        style(&opt.instance_type).cyan(),
        style(&ami).cyan(),
    );

    let app = ui::ask_app_name(&mut prompt)?;
    let name = ec2::push_name(&app);

    let vpc = ui::choose(&mut prompt, "VPC", prov.vpcs().await?, |v| v.label())?;
    let subnet = ui::choose(&mut prompt, "subnet", prov.subnets(&vpc.id).await?, |s| {
        s.label()
    })?;

    let mut pem_path = None;
    match prov.create_key_pair(&app).await? {
        Created::New(key) => {
            println!(
                "Created keypair {}; private key written to {}",
                style(&key.name).green(),
                style(key.pem_path.display()).green(),
            );
            pem_path = Some(key.pem_path);
        }
        Created::AlreadyExists => {
            ui::confirm_reuse(&mut prompt, "Keypair", &name)?;
            println!("Reusing existing keypair {} (no key file written)", name);
        }
    }

    let security_group_id = match prov.create_security_group(&app, &vpc.id).await? {
        Created::New(id) => {
            println!("Created security group {}", style(&id).green());
            id
        }
        Created::AlreadyExists => {
            ui::confirm_reuse(&mut prompt, "Security group", &name)?;
            let id = prov.find_security_group(&app, &vpc.id).await?;
            println!("Reusing existing security group {}", id);
            id
        }
    };

    let spec = LaunchSpec {
        ami,
        instance_type: opt.instance_type,
        subnet_id: subnet.id,
        key_name: name.clone(),
        security_group_id: security_group_id.clone(),
    };
    let instance_id = prov.run_instance(&spec).await?;
    println!("Launched instance {}", style(&instance_id).green());

    let spinner = ProgressBar::new_spinner();
    spinner.set_message("waiting for the instance to reach 'running'");
    spinner.enable_steady_tick(std::time::Duration::from_millis(100));
    prov.wait_until_running(&instance_id).await?;
    spinner.finish_with_message("instance is running");

    prov.tag_instance(&instance_id, &name).await?;
    println!("Tagged instance as {}", style(&name).green());

    let eip = prov.allocate_address().await?;
    prov.associate_address(&eip, &instance_id).await?;
    println!("Elastic IP {} attached", style(&eip.public_ip).green());

    print_summary(
        &instance_id,
        &eip,
        &security_group_id,
        pem_path.as_deref(),
        &app,
    );

    Ok(())
}

fn print_summary(
    instance_id: &str,
    eip: &ec2::ElasticIp,
    security_group_id: &str,
    pem_path: Option<&Path>,
    app: &str,
) {
    println!();
    println!("{}", style("Push server is up").bold().green());
    println!("  instance:       {}", instance_id);
    println!("  elastic ip:     {}", eip.public_ip);
    println!("  security group: {}", security_group_id);
    if let Some(p) = pem_path {
        println!("  private key:    {}", p.display());
    }

    println!();
    println!("{}", style("Next steps").bold());
    match pem_path {
        Some(p) => {
            println!("  chmod 400 {}", p.display());
            println!("  ssh -i {} ec2-user@{}", p.display(), eip.public_ip);
        }
        None => {
            // the keypair was reused; no key file was written this run
            println!(
                "  ssh -i {} ec2-user@{}   # key file from the run that created the keypair",
                ec2::pem_file(app).display(),
                eip.public_ip
            );
        }
    }
    println!("  then log in and run the server creation scripts");
}
