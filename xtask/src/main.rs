mod synth;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{exit, Command};

use clap::{Parser, Subcommand, ValueEnum};
use etl_stack_core::stack::DEFAULT_CODE_KEY;
use synth::{build_declaration, plan_lines, write_template, StackArgs};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

const LAMBDA_PACKAGE: &str = "etl_stack_lambda";
const LAMBDA_BIN: &str = "custom_resource_lambda";
const DIST_DIR: &str = "infra/etl_stack/dist";
const DEFAULT_TEMPLATE_PATH: &str = "infra/etl_stack/template.json";

// ── CLI definition ─────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "Task runner for the DynamoDB to OpenSearch ETL stack",
    long_about = "A unified CLI for synthesizing the CloudFormation template,\n\
                  packaging the custom-resource Lambda, and running CI checks."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the CloudFormation template
    Synth {
        #[command(flatten)]
        stack: StackArgs,
        /// Output file path
        #[arg(long, default_value = DEFAULT_TEMPLATE_PATH)]
        output: PathBuf,
    },
    /// Print the resource creation and deletion order
    Plan {
        #[command(flatten)]
        stack: StackArgs,
    },
    /// Build the custom-resource Lambda and zip it as `bootstrap`
    LambdaPackage {
        /// Compilation target triple for the Lambda binary
        #[arg(long, default_value = "x86_64-unknown-linux-gnu")]
        target: String,
        /// Build profile used for the binary
        #[arg(value_enum, long, default_value_t = BuildProfile::Release)]
        profile: BuildProfile,
    },
    /// Run CI checks (fmt, clippy, tests, template synthesis)
    Ci {
        /// Job to run
        #[arg(value_enum, default_value_t = CiJob::Check)]
        job: CiJob,
    },
}

#[derive(Clone, ValueEnum)]
enum CiJob {
    /// Formatting, clippy, and tests
    Check,
    /// Synthesize the template with a fixed seed
    Synth,
    /// Run check + synth
    All,
}

#[derive(Clone, Copy, ValueEnum)]
enum BuildProfile {
    Debug,
    Release,
}

impl BuildProfile {
    fn dir_name(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Release => "release",
        }
    }

    fn as_cargo_flag(self) -> Option<&'static str> {
        match self {
            Self::Debug => None,
            Self::Release => Some("--release"),
        }
    }
}

// ── helpers ────────────────────────────────────────────────────────

fn step(label: &str) {
    eprintln!("\n=== {label} ===");
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("error: {message}");
    exit(1);
}

fn run_cargo(args: &[&str]) {
    eprintln!("+ cargo {}", args.join(" "));
    let status = Command::new("cargo")
        .args(args)
        .status()
        .unwrap_or_else(|error| fail(format!("failed to execute cargo: {error}")));
    if !status.success() {
        exit(status.code().unwrap_or(1));
    }
}

/// Targets rustup reports as installed; `None` when rustup is unavailable,
/// in which case cargo reports a missing target itself.
fn installed_targets() -> Option<Vec<String>> {
    let output = Command::new("rustup")
        .args(["target", "list", "--installed"])
        .output()
        .ok()?;
    output.status.success().then(|| {
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()
    })
}

fn package_custom_resource_lambda(target: &str, profile: BuildProfile) -> PathBuf {
    if let Some(installed) = installed_targets() {
        if !installed.iter().any(|name| name == target) {
            fail(format!(
                "rust target `{target}` is not installed; run `rustup target add {target}`"
            ));
        }
    }

    step("Build custom-resource lambda binary");
    let mut cargo_args = vec![
        "build",
        "-p",
        LAMBDA_PACKAGE,
        "--target",
        target,
        "--bin",
        LAMBDA_BIN,
    ];
    if let Some(flag) = profile.as_cargo_flag() {
        cargo_args.push(flag);
    }
    run_cargo(&cargo_args);

    step("Package lambda zip artifact");
    let binary_path = Path::new("target")
        .join(target)
        .join(profile.dir_name())
        .join(LAMBDA_BIN);
    let dist_dir = Path::new(DIST_DIR);
    fs::create_dir_all(dist_dir)
        .unwrap_or_else(|error| fail(format!("failed to create '{}': {error}", dist_dir.display())));

    let zip_path = dist_dir.join(DEFAULT_CODE_KEY);
    package_lambda_zip(&binary_path, &zip_path).unwrap_or_else(|error| fail(error));

    eprintln!(
        "\nPackaged artifact:\n- {}\nUpload it to the code bucket under `{DEFAULT_CODE_KEY}`.",
        zip_path.display()
    );
    zip_path
}

fn synth(stack: &StackArgs, output: &Path) {
    step("Synthesize CloudFormation template");
    let declaration = build_declaration(stack).unwrap_or_else(|error| fail(error));
    let fingerprint = write_template(&declaration, output).unwrap_or_else(|error| fail(error));
    eprintln!(
        "Wrote {} ({} resources, bucket {}, fingerprint {fingerprint})",
        output.display(),
        declaration.graph.len(),
        declaration.parameters.bucket_name,
    );
}

fn plan(stack: &StackArgs) {
    let lines = build_declaration(stack)
        .and_then(|declaration| plan_lines(&declaration))
        .unwrap_or_else(|error| fail(error));
    for line in lines {
        println!("{line}");
    }
}

/// Lambda's custom runtime expects a single executable named `bootstrap`.
fn package_lambda_zip(binary_path: &Path, zip_path: &Path) -> Result<(), String> {
    let binary = fs::read(binary_path).map_err(|error| {
        format!("expected lambda binary at '{}': {error}", binary_path.display())
    })?;
    let write_error = |error: &dyn std::fmt::Display| {
        format!("failed to write '{}': {error}", zip_path.display())
    };

    let file = fs::File::create(zip_path).map_err(|error| write_error(&error))?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o755);
    zip.start_file("bootstrap", options)
        .map_err(|error| write_error(&error))?;
    zip.write_all(&binary).map_err(|error| write_error(&error))?;
    zip.finish().map_err(|error| write_error(&error))?;
    Ok(())
}

// ── CI jobs ────────────────────────────────────────────────────────

fn ci_check() {
    step("Check formatting");
    run_cargo(&["fmt", "--all", "--", "--check"]);

    step("Clippy");
    run_cargo(&[
        "clippy",
        "--all-targets",
        "--all-features",
        "--",
        "-D",
        "warnings",
    ]);

    step("Test etl_stack_core");
    run_cargo(&["test", "-p", "etl_stack_core"]);

    step("Test etl_stack_lambda");
    run_cargo(&["test", "-p", LAMBDA_PACKAGE]);

    step("Test xtask");
    run_cargo(&["test", "-p", "xtask"]);
}

fn ci_synth() {
    let stack = StackArgs {
        region: "us-east-1".to_string(),
        current_user_identity: Some("arn:aws:iam::000000000000:user/ci".to_string()),
        seed: Some(0),
        code_key: DEFAULT_CODE_KEY.to_string(),
        ..StackArgs::default()
    };
    synth(&stack, Path::new("target/ci/template.json"));
}

// ── main ───────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Synth { stack, output } => synth(&stack, &output),
        Commands::Plan { stack } => plan(&stack),
        Commands::LambdaPackage { target, profile } => {
            package_custom_resource_lambda(&target, profile);
        }
        Commands::Ci { job } => {
            match job {
                CiJob::Check => ci_check(),
                CiJob::Synth => ci_synth(),
                CiJob::All => {
                    ci_check();
                    ci_synth();
                }
            }
            eprintln!("\nCI job passed.");
        }
    }
}
