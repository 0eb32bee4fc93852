use std::fs;
use std::path::{Path, PathBuf};

use clap::Args;
use etl_stack_core::params::{resolve, StackEnvironment, StackOverrides};
use etl_stack_core::stack::{declare_stack, CodeLocation, StackDeclaration, DEFAULT_CODE_KEY};
use etl_stack_core::template::{render_template, render_template_string, template_fingerprint};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Stack configuration shared by `synth` and `plan`. Flags win over the
/// overrides file; anything left unset falls back to the built-in defaults.
#[derive(Args, Debug, Clone, Default)]
pub struct StackArgs {
    /// JSON file with stack overrides
    #[arg(long, env = "ETL_STACK_OVERRIDES")]
    pub overrides: Option<PathBuf>,
    /// Deployment region
    #[arg(long, env = "AWS_REGION", default_value = "us-east-1")]
    pub region: String,
    /// Account id; resolved by CloudFormation when omitted
    #[arg(long, env = "ETL_STACK_ACCOUNT_ID")]
    pub account_id: Option<String>,
    /// Comma-separated availability zones for the isolated subnets
    #[arg(long, env = "ETL_STACK_AVAILABILITY_ZONES", value_delimiter = ',')]
    pub availability_zones: Vec<String>,
    /// IAM principal ARN granted access to the collection
    #[arg(long, env = "ETL_STACK_CURRENT_USER_IDENTITY")]
    pub current_user_identity: Option<String>,
    #[arg(long)]
    pub collection_name: Option<String>,
    #[arg(long)]
    pub table_name: Option<String>,
    #[arg(long)]
    pub bucket_name: Option<String>,
    #[arg(long)]
    pub pipeline_name: Option<String>,
    #[arg(long)]
    pub log_group_name: Option<String>,
    #[arg(long)]
    pub vpc_name: Option<String>,
    #[arg(long)]
    pub vpc_endpoint_name: Option<String>,
    /// Seed for the generated bucket-name suffix
    #[arg(long, env = "ETL_STACK_SEED")]
    pub seed: Option<u64>,
    /// Bucket holding the packaged handler
    #[arg(long, env = "ETL_STACK_CODE_BUCKET")]
    pub code_bucket: Option<String>,
    /// Object key of the packaged handler
    #[arg(long, default_value = DEFAULT_CODE_KEY)]
    pub code_key: String,
}

impl StackArgs {
    fn flag_overrides(&self) -> StackOverrides {
        StackOverrides {
            collection_name: self.collection_name.clone(),
            table_name: self.table_name.clone(),
            bucket_name: self.bucket_name.clone(),
            pipeline_name: self.pipeline_name.clone(),
            log_group_name: self.log_group_name.clone(),
            vpc_name: self.vpc_name.clone(),
            vpc_endpoint_name: self.vpc_endpoint_name.clone(),
            current_user_identity: self.current_user_identity.clone(),
        }
    }

    fn environment(&self) -> StackEnvironment {
        let mut environment = StackEnvironment::new(&self.region);
        if let Some(account_id) = &self.account_id {
            environment = environment.with_account_id(account_id);
        }
        if !self.availability_zones.is_empty() {
            environment = environment.with_availability_zones(self.availability_zones.clone());
        }
        environment
    }

    fn code_location(&self) -> CodeLocation {
        CodeLocation {
            bucket: self.code_bucket.clone(),
            key: self.code_key.clone(),
        }
    }
}

pub fn load_overrides(path: &Path) -> Result<StackOverrides, String> {
    let raw = fs::read_to_string(path)
        .map_err(|error| format!("failed to read overrides '{}': {error}", path.display()))?;
    serde_json::from_str(&raw)
        .map_err(|error| format!("invalid overrides '{}': {error}", path.display()))
}

pub fn build_declaration(args: &StackArgs) -> Result<StackDeclaration, String> {
    let from_file = match &args.overrides {
        Some(path) => load_overrides(path)?,
        None => StackOverrides::default(),
    };
    let overrides = from_file.merge(args.flag_overrides());

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let params = resolve(overrides, &mut rng).map_err(|error| error.to_string())?;
    declare_stack(&params, &args.environment(), &args.code_location())
        .map_err(|error| error.to_string())
}

/// Writes the rendered template and returns its fingerprint.
pub fn write_template(declaration: &StackDeclaration, output: &Path) -> Result<String, String> {
    let rendered = render_template_string(declaration)
        .map_err(|error| format!("failed to render template: {error}"))?;
    if let Some(parent) = output.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|error| format!("failed to create '{}': {error}", parent.display()))?;
    }
    fs::write(output, rendered)
        .map_err(|error| format!("failed to write '{}': {error}", output.display()))?;
    Ok(template_fingerprint(&render_template(declaration)))
}

/// Creation order followed by deletion order, one numbered resource per line.
pub fn plan_lines(declaration: &StackDeclaration) -> Result<Vec<String>, String> {
    let graph = &declaration.graph;
    let creation = graph.creation_order().map_err(|error| error.to_string())?;
    let deletion = graph.deletion_order().map_err(|error| error.to_string())?;

    let describe = |index: usize, logical_id: &str| {
        let resource_type = graph
            .get(logical_id)
            .map(|node| node.resource_type.as_str())
            .unwrap_or("?");
        format!("{:>3}. {logical_id} ({resource_type})", index + 1)
    };

    let mut lines = vec!["create:".to_string()];
    lines.extend(creation.iter().enumerate().map(|(i, id)| describe(i, id)));
    lines.push("delete:".to_string());
    lines.extend(deletion.iter().enumerate().map(|(i, id)| describe(i, id)));
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use etl_stack_core::stack::logical_ids;

    use super::*;

    fn args() -> StackArgs {
        StackArgs {
            region: "eu-west-1".to_string(),
            current_user_identity: Some("arn:aws:iam::222222222222:user/ops".to_string()),
            seed: Some(5),
            code_key: DEFAULT_CODE_KEY.to_string(),
            ..StackArgs::default()
        }
    }

    #[test]
    fn flags_override_the_overrides_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("overrides.json");
        fs::write(
            &path,
            r#"{"table_name": "from-file", "collection_name": "file-collection"}"#,
        )
        .expect("write overrides");

        let declaration = build_declaration(&StackArgs {
            overrides: Some(path),
            table_name: Some("from-flag".to_string()),
            ..args()
        })
        .expect("declares");

        assert_eq!(declaration.parameters.table_name, "from-flag");
        assert_eq!(declaration.parameters.collection_name, "file-collection");
    }

    #[test]
    fn unknown_override_keys_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("overrides.json");
        fs::write(&path, r#"{"tabel_name": "typo"}"#).expect("write overrides");

        let error = load_overrides(&path).expect_err("typo rejected");
        assert!(error.contains("invalid overrides"), "{error}");
    }

    #[test]
    fn missing_identity_is_reported() {
        let error = build_declaration(&StackArgs {
            current_user_identity: None,
            ..args()
        })
        .expect_err("identity required");
        assert!(error.contains("current_user_identity"), "{error}");
    }

    #[test]
    fn seeded_synth_is_reproducible() {
        let dir = tempfile::tempdir().expect("tempdir");
        let first = dir.path().join("a/template.json");
        let second = dir.path().join("b/template.json");

        let first_fingerprint =
            write_template(&build_declaration(&args()).expect("declares"), &first).expect("writes");
        let second_fingerprint =
            write_template(&build_declaration(&args()).expect("declares"), &second)
                .expect("writes");

        assert_eq!(first_fingerprint, second_fingerprint);
        assert_eq!(
            fs::read_to_string(&first).expect("read"),
            fs::read_to_string(&second).expect("read")
        );
        let template: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&first).expect("read")).expect("json");
        assert!(template["Resources"][logical_ids::CUSTOM_RESOURCE].is_object());
    }

    #[test]
    fn plan_lists_custom_resource_after_its_function() {
        let declaration = build_declaration(&args()).expect("declares");
        let lines = plan_lines(&declaration).expect("plan");
        let split = lines
            .iter()
            .position(|line| line == "delete:")
            .expect("delete section");
        let (create, delete) = lines.split_at(split);
        let index_of = |section: &[String], id: &str| {
            section
                .iter()
                .position(|line| line.contains(&format!(" {id} (")))
                .unwrap_or_else(|| panic!("{id} missing from plan"))
        };

        assert!(
            index_of(create, logical_ids::FUNCTION) < index_of(create, logical_ids::CUSTOM_RESOURCE)
        );
        assert!(
            index_of(delete, logical_ids::CUSTOM_RESOURCE) < index_of(delete, logical_ids::FUNCTION)
        );
    }
}
