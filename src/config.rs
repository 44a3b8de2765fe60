//! Flat-file configuration: the stored AMI id and the AWS credentials.
//!
//! Both files are plain text, read line by line. Blank lines and lines
//! starting with `#` are skipped. Missing files and missing fields are
//! fatal, and the error names the file or field in question.

use color_eyre::eyre::{bail, WrapErr};
use color_eyre::Report;
use educe::Educe;
use rusoto_core::Region;
use std::fs;
use std::path::Path;

/// Default path of the file holding the AMI id to launch.
pub const AMI_ID_FILE: &str = "ami_id";

/// Default path of the file holding the AWS credentials.
pub const CREDENTIALS_FILE: &str = "aws_credentials";

/// AWS credentials loaded from [`CREDENTIALS_FILE`].
#[derive(Clone, Educe)]
#[educe(Debug)]
pub struct Credentials {
    pub region: Region,
    pub access_key_id: String,
    #[educe(Debug(ignore))]
    pub secret_access_key: String,
}

impl Credentials {
    /// Parse credentials from a `key=value` file.
    ///
    /// Recognized keys are `aws_region`, `aws_access_key_id`, and
    /// `aws_secret_access_key`; all three are required.
    pub fn from_file(path: &Path) -> Result<Self, Report> {
        let contents = fs::read_to_string(path)
            .wrap_err_with(|| format!("no credentials file '{}' found", path.display()))?;

        let mut region = None;
        let mut access_key_id = None;
        let mut secret_access_key = None;
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(v) = line.strip_prefix("aws_region=") {
                region = Some(v.trim().to_string());
            } else if let Some(v) = line.strip_prefix("aws_access_key_id=") {
                access_key_id = Some(v.trim().to_string());
            } else if let Some(v) = line.strip_prefix("aws_secret_access_key=") {
                secret_access_key = Some(v.trim().to_string());
            }
        }

        let required = |v: Option<String>, key: &str| -> Result<String, Report> {
            match v {
                Some(v) if !v.is_empty() => Ok(v),
                _ => bail!("no {} set in credentials file '{}'", key, path.display()),
            }
        };

        let region = required(region, "aws_region")?;
        let region = region
            .parse()
            .wrap_err_with(|| format!("unrecognized aws_region {:?}", region))?;

        Ok(Credentials {
            region,
            access_key_id: required(access_key_id, "aws_access_key_id")?,
            secret_access_key: required(secret_access_key, "aws_secret_access_key")?,
        })
    }
}

/// Read the AMI id to launch: the first non-comment line starting with
/// `ami-`.
pub fn load_ami_id(path: &Path) -> Result<String, Report> {
    let contents = fs::read_to_string(path)
        .wrap_err_with(|| format!("no file '{}' found", path.display()))?;

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        // the file may grow other kinds of entries; only ami- lines count
        if line.starts_with("ami-") {
            return Ok(line.to_string());
        }
    }

    bail!("no AMI name set in the '{}' file", path.display())
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    fn file_with(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn credentials_complete() {
        let f = file_with(
            "# push server credentials\n\
             aws_region=us-east-1\n\
             aws_access_key_id=AKIAEXAMPLE\n\
             aws_secret_access_key=sekrit\n",
        );
        let c = Credentials::from_file(f.path()).unwrap();
        assert_eq!(c.region, Region::UsEast1);
        assert_eq!(c.access_key_id, "AKIAEXAMPLE");
        assert_eq!(c.secret_access_key, "sekrit");
    }

    #[test]
    fn credentials_missing_field_is_named() {
        let f = file_with("aws_access_key_id=AKIAEXAMPLE\naws_secret_access_key=sekrit\n");
        let err = Credentials::from_file(f.path()).unwrap_err();
        assert!(err.to_string().contains("aws_region"), "{}", err);

        let f = file_with("aws_region=us-east-1\naws_secret_access_key=sekrit\n");
        let err = Credentials::from_file(f.path()).unwrap_err();
        assert!(err.to_string().contains("aws_access_key_id"), "{}", err);

        let f = file_with("aws_region=us-east-1\naws_access_key_id=AKIAEXAMPLE\n");
        let err = Credentials::from_file(f.path()).unwrap_err();
        assert!(err.to_string().contains("aws_secret_access_key"), "{}", err);
    }

    #[test]
    fn credentials_missing_file() {
        let err = Credentials::from_file(Path::new("does-not-exist")).unwrap_err();
        assert!(err.to_string().contains("does-not-exist"), "{}", err);
    }

    #[test]
    fn credentials_debug_hides_secret() {
        let f = file_with(
            "aws_region=us-east-1\n\
             aws_access_key_id=AKIAEXAMPLE\n\
             aws_secret_access_key=sekrit\n",
        );
        let c = Credentials::from_file(f.path()).unwrap();
        assert!(!format!("{:?}", c).contains("sekrit"));
    }

    #[test]
    fn ami_id_first_matching_line() {
        let f = file_with("# candidates\n\n# ami-oldone\nami-0abc123\nami-0def456\n");
        assert_eq!(load_ami_id(f.path()).unwrap(), "ami-0abc123");
    }

    #[test]
    fn ami_id_only_comments() {
        let f = file_with("# nothing here yet\n\n#ami-commented-out\n");
        let err = load_ami_id(f.path()).unwrap_err();
        assert!(err.to_string().contains("no AMI name set"), "{}", err);
    }

    #[test]
    fn ami_id_ignores_other_entries() {
        let f = file_with("snap-0123\nami-0abc123\n");
        assert_eq!(load_ami_id(f.path()).unwrap(), "ami-0abc123");
    }
}
