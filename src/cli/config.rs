//! Conversion of CLI arguments into a `PipelineConfig`

use crate::cli::main_impl::Cli;
use crate::config::{
    DatabaseConfig, ModelConfig, ModelLocation, PipelineConfig, RemovalSettings,
    RestorationSettings, SftpAuth, SftpConfig,
};
use anyhow::{Context, Result};
use secrecy::Secret;

pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Build and validate the pipeline configuration
    pub(crate) fn from_cli(cli: &Cli) -> Result<PipelineConfig> {
        let database = DatabaseConfig::new(
            cli.db_host.as_str(),
            cli.db_user.as_str(),
            cli.db_pass.as_str(),
            cli.db_name.as_str(),
        )
        .with_port(cli.db_port);

        let sftp = SftpConfig::new(
            cli.ssh_host.as_str(),
            cli.ssh_user.as_str(),
            Self::sftp_auth(cli)?,
            cli.ssh_remote_dir.as_str(),
        )
        .with_port(cli.ssh_port);

        let models = ModelConfig {
            detector: ModelLocation::parse(&cli.detector_model),
            restoration: ModelLocation::parse(&cli.restoration_model),
            upsampler: ModelLocation::parse(&cli.upsampler_model),
            segmentation: ModelLocation::parse(&cli.segmentation_model),
            execution_provider: cli.execution_provider,
            intra_threads: cli.threads,
        };

        let restoration = RestorationSettings {
            upscale: cli.upscale,
            blend_weight: cli.blend_weight,
            only_center_face: !cli.all_faces,
            ..RestorationSettings::default()
        };

        let removal = RemovalSettings {
            alpha_matting: !cli.no_alpha_matting,
            ..RemovalSettings::default()
        };

        PipelineConfig::builder(database, sftp)
            .models(models)
            .restoration(restoration)
            .removal(removal)
            .http_timeout_secs(cli.http_timeout)
            .build()
            .context("Configuration validation failed")
    }

    fn sftp_auth(cli: &Cli) -> Result<SftpAuth> {
        if let Some(path) = &cli.ssh_private_key_path {
            return Ok(SftpAuth::PrivateKey(path.clone()));
        }
        match &cli.ssh_password {
            Some(password) => Ok(SftpAuth::Password(Secret::new(password.clone()))),
            None => anyhow::bail!("Either SSH_PRIVATE_KEY_PATH or SSH_PASSWORD must be set"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionProvider;
    use clap::Parser;
    use secrecy::ExposeSecret;
    use std::path::PathBuf;

    const REQUIRED: &[&str] = &[
        "profile-restore",
        "--db-host",
        "db.internal",
        "--db-user",
        "wpt",
        "--db-pass",
        "hunter2",
        "--db-name",
        "wpt",
        "--ssh-host",
        "files.example.org",
        "--ssh-user",
        "deploy",
        "--ssh-remote-dir",
        "/var/www/players",
    ];

    fn parse(extra: &[&str]) -> Cli {
        Cli::try_parse_from(REQUIRED.iter().chain(extra.iter())).unwrap()
    }

    #[test]
    fn test_private_key_preferred_over_password() {
        let cli = parse(&[
            "--ssh-private-key-path",
            "/home/deploy/.ssh/id_ed25519",
            "--ssh-password",
            "ignored",
        ]);
        let config = CliConfigBuilder::from_cli(&cli).unwrap();

        match config.sftp.auth {
            SftpAuth::PrivateKey(path) => {
                assert_eq!(path, PathBuf::from("/home/deploy/.ssh/id_ed25519"));
            },
            SftpAuth::Password(_) => panic!("expected key authentication"),
        }
    }

    #[test]
    fn test_password_auth_and_defaults() {
        let cli = parse(&["--ssh-password", "s3cret"]);
        let config = CliConfigBuilder::from_cli(&cli).unwrap();

        match &config.sftp.auth {
            SftpAuth::Password(password) => assert_eq!(password.expose_secret(), "s3cret"),
            SftpAuth::PrivateKey(_) => panic!("expected password authentication"),
        }
        assert_eq!(config.database.port, 3306);
        assert_eq!(config.sftp.port, 22);
        assert_eq!(config.database.password.expose_secret(), "hunter2");
        assert_eq!(config.models.execution_provider, ExecutionProvider::Auto);
        assert_eq!(config.restoration, RestorationSettings::default());
        assert_eq!(config.removal, RemovalSettings::default());
    }

    #[test]
    fn test_model_urls_and_overrides() {
        let cli = parse(&[
            "--ssh-password",
            "s3cret",
            "--restoration-model",
            "https://example.org/GFPGANv1.4.onnx#sha256=ABCDEF",
            "--execution-provider",
            "cpu",
            "--upscale",
            "4",
            "--no-alpha-matting",
            "--all-faces",
        ]);
        let config = CliConfigBuilder::from_cli(&cli).unwrap();

        assert_eq!(
            config.models.restoration,
            ModelLocation::Url {
                url: "https://example.org/GFPGANv1.4.onnx".to_string(),
                sha256: Some("abcdef".to_string()),
            }
        );
        assert_eq!(config.models.execution_provider, ExecutionProvider::Cpu);
        assert_eq!(config.restoration.upscale, 4);
        assert!(!config.restoration.only_center_face);
        assert!(!config.removal.alpha_matting);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let cli = parse(&["--ssh-password", "s3cret", "--blend-weight", "1.5"]);
        assert!(CliConfigBuilder::from_cli(&cli).is_err());

        assert!(Cli::try_parse_from(REQUIRED.iter().chain(["--execution-provider", "tpu"].iter()))
            .is_err());
    }
}
