use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use brainprep_core::{BrainExtractor, DeviceSelection, PercentileNormalizer, Registrator};
use brainprep_extraction::{HdBetExtractor, HdBetMode};
use brainprep_io::NiftiIo;
use brainprep_pipeline::{apply_environment_overrides, load_config, Preprocessor, PreprocessorConfig};
use brainprep_registration::{AntsRegistrator, AntsTransformType, IdentityRegistrator};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, error, info, warn};

mod discover;
mod logging;
mod plan;

use discover::{discover_exams, ExamInputs};
use plan::{build_exam, save_dirs, OutputOptions};

#[derive(Parser, Debug)]
#[command(name = "brainprep")]
#[command(about = "Coregistration, atlas registration and brain extraction of multi-modal MRI exams")]
struct Cli {
    /// Log file; defaults to log/brainprep_<timestamp>.log
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Preprocess every exam below a data directory
    Run(RunArgs),

    /// List the exams and modalities that would be processed
    Discover {
        /// Directory with one sub-directory per exam
        #[arg(short, long)]
        data_dir: PathBuf,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Directory with one sub-directory per exam
    #[arg(short, long)]
    data_dir: PathBuf,

    /// Atlas image; overrides the configuration file
    #[arg(short, long)]
    atlas: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write intensity-preserving outputs
    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    return_raw: bool,

    /// Write normalized outputs
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    return_normalized: bool,

    /// Also write outputs that keep the skull
    #[arg(long)]
    return_skull: bool,

    /// auto, cpu, cuda or cuda:<ids>
    #[arg(long, value_parser = parse_device)]
    device: Option<DeviceSelection>,

    /// Thread budget for the external tools
    #[arg(long)]
    threads: Option<usize>,

    /// Process moving modalities concurrently
    #[arg(long)]
    parallel: bool,

    /// Keep scratch workspaces for inspection
    #[arg(long)]
    keep_workspace: bool,

    /// Parent directory for scratch workspaces
    #[arg(long)]
    temp_dir: Option<PathBuf>,

    /// Directory holding the ANTs executables
    #[arg(long)]
    ants_bin: Option<PathBuf>,

    /// Estimate affine instead of rigid transforms
    #[arg(long)]
    affine: bool,

    /// Skip registration and copy volumes unchanged
    #[arg(long, conflicts_with_all = ["affine", "ants_bin"])]
    identity: bool,

    /// HD-BET executable
    #[arg(long)]
    hd_bet: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = BetMode::Accurate)]
    bet_mode: BetMode,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum BetMode {
    Fast,
    Accurate,
}

impl From<BetMode> for HdBetMode {
    fn from(mode: BetMode) -> Self {
        match mode {
            BetMode::Fast => HdBetMode::Fast,
            BetMode::Accurate => HdBetMode::Accurate,
        }
    }
}

fn parse_device(value: &str) -> std::result::Result<DeviceSelection, String> {
    DeviceSelection::parse(value).ok_or_else(|| format!("unknown device {value:?}, expected auto, cpu, cuda or cuda:<ids>"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_path = logging::init_logging(cli.log_file.clone())?;
    info!("Logging to {}", log_path.display());

    match cli.command {
        Commands::Run(args) => run(&args),
        Commands::Discover { data_dir } => {
            list_exams(&data_dir)?;
            Ok(())
        }
    }
}

/// Configuration tiers: file (or defaults) with environment overrides, then
/// command-line flags.
fn resolve_config(args: &RunArgs) -> Result<PreprocessorConfig> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => {
            let mut config = PreprocessorConfig::default();
            apply_environment_overrides(&mut config);
            config
        }
    };

    if let Some(atlas) = &args.atlas {
        config.atlas_image = atlas.clone();
    }
    if let Some(temp_dir) = &args.temp_dir {
        config.temp_root = Some(temp_dir.clone());
    }
    if let Some(device) = &args.device {
        config.run.device = device.clone();
    }
    if let Some(threads) = args.threads {
        config.run.threads = Some(threads);
    }
    if args.parallel {
        config.parallel = true;
    }
    if args.keep_workspace {
        config.keep_workspace = true;
    }

    config.validate()?;
    Ok(config)
}

fn output_options(args: &RunArgs) -> Result<OutputOptions> {
    if !args.return_raw && !args.return_normalized {
        bail!("Nothing to write: enable --return-raw or --return-normalized");
    }
    Ok(OutputOptions {
        raw: args.return_raw,
        normalized: args.return_normalized,
        skull: args.return_skull,
    })
}

fn build_registrator(args: &RunArgs) -> Arc<dyn Registrator> {
    if args.identity {
        warn!("Identity registration: volumes are assumed to be aligned already");
        return Arc::new(IdentityRegistrator::new());
    }
    let mut ants = AntsRegistrator::new();
    if let Some(bin) = &args.ants_bin {
        ants = ants.with_bin_dir(bin);
    }
    if args.affine {
        ants = ants.with_transform_type(AntsTransformType::Affine);
    }
    Arc::new(ants)
}

fn build_extractor(args: &RunArgs) -> Arc<dyn BrainExtractor> {
    let mut extractor = HdBetExtractor::new().with_mode(args.bet_mode.into());
    if let Some(executable) = &args.hd_bet {
        extractor = extractor.with_executable(executable);
    }
    Arc::new(extractor)
}

fn run(args: &RunArgs) -> Result<()> {
    let config = resolve_config(args)?;
    let options = output_options(args)?;
    let exams = discover_exams(&args.data_dir)?;
    if exams.is_empty() {
        warn!("No exams found in {}", args.data_dir.display());
        return Ok(());
    }
    info!("Found {} exams in {}", exams.len(), args.data_dir.display());

    let preprocessor = Preprocessor::new(
        build_registrator(args),
        build_extractor(args),
        Arc::new(NiftiIo::new()),
        config,
    );
    let normalizer = Arc::new(PercentileNormalizer::default());

    let start = Instant::now();
    let pb = ProgressBar::new(exams.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .context("Invalid progress template")?
            .progress_chars("#>-"),
    );

    let mut failed = Vec::new();
    for inputs in &exams {
        pb.set_message(inputs.id.clone());
        if let Err(e) = process_exam(&preprocessor, inputs, options, normalizer.clone()) {
            error!("Exam {} failed: {:#}", inputs.id, e);
            failed.push(inputs.id.clone());
        }
        pb.inc(1);
    }
    pb.finish_with_message("done");

    info!(
        "Processed {} of {} exams in {:.1?}",
        exams.len() - failed.len(),
        exams.len(),
        start.elapsed()
    );
    if !failed.is_empty() {
        bail!("{} exams failed: {}", failed.len(), failed.join(", "));
    }
    Ok(())
}

fn process_exam(
    preprocessor: &Preprocessor,
    inputs: &ExamInputs,
    options: OutputOptions,
    normalizer: Arc<PercentileNormalizer>,
) -> Result<()> {
    info!("Processing exam {} from {}", inputs.id, inputs.dir.display());
    let mut exam = build_exam(inputs, &options, normalizer)?;
    let report = preprocessor.run(&mut exam, &save_dirs(inputs))?;
    for modality in &inputs.modalities {
        let written: Vec<String> = report
            .outputs_for(&modality.name)
            .map(|o| o.path.display().to_string())
            .collect();
        debug!("Exam {} {}: {}", inputs.id, modality.name, written.join(", "));
    }
    info!(
        "Exam {}: {} outputs in {:.1?}",
        inputs.id,
        report.outputs.len(),
        report.total_elapsed()
    );
    Ok(())
}

fn list_exams(data_dir: &Path) -> Result<()> {
    let exams = discover_exams(data_dir)?;
    for exam in &exams {
        let names: Vec<&str> = exam.modalities.iter().map(|m| m.name.as_str()).collect();
        println!("{}: center {} | {}", exam.id, exam.center().name, names.join(", "));
        for modality in &exam.modalities {
            println!("  {:<4} {}", modality.name, modality.image.display());
            for label in [&modality.roi, &modality.biopsy].into_iter().flatten() {
                println!("       {}", label.display());
            }
        }
    }
    println!("{} exams", exams.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> RunArgs {
        match Cli::try_parse_from(args).unwrap().command {
            Commands::Run(args) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_run_defaults() {
        let args = parse(&["brainprep", "run", "--data-dir", "data", "--atlas", "atlas.nii.gz"]);
        assert!(!args.return_raw);
        assert!(args.return_normalized);
        assert!(!args.return_skull);
        assert_eq!(args.bet_mode, BetMode::Accurate);

        let options = output_options(&args).unwrap();
        assert!(options.normalized && !options.raw);

        let config = resolve_config(&args).unwrap();
        assert_eq!(config.atlas_image, PathBuf::from("atlas.nii.gz"));
    }

    #[test]
    fn test_cli_overrides() {
        let args = parse(&[
            "brainprep",
            "run",
            "-d",
            "data",
            "--atlas",
            "atlas.nii.gz",
            "--device",
            "cuda:1",
            "--threads",
            "4",
            "--parallel",
            "--return-raw",
            "true",
            "--return-normalized",
            "false",
            "--bet-mode",
            "fast",
        ]);
        let config = resolve_config(&args).unwrap();
        assert_eq!(
            config.run.device,
            DeviceSelection::Cuda {
                visible_devices: Some("1".to_string())
            }
        );
        assert_eq!(config.run.threads, Some(4));
        assert!(config.parallel);
        assert_eq!(HdBetMode::from(args.bet_mode), HdBetMode::Fast);

        let options = output_options(&args).unwrap();
        assert!(options.raw && !options.normalized);
    }

    #[test]
    fn test_no_outputs_is_rejected() {
        let args = parse(&[
            "brainprep",
            "run",
            "-d",
            "data",
            "--return-normalized",
            "false",
        ]);
        assert!(output_options(&args).is_err());
    }

    #[test]
    fn test_invalid_arguments() {
        assert!(Cli::try_parse_from(["brainprep", "run", "-d", "data", "--device", "tpu"]).is_err());
        assert!(Cli::try_parse_from(["brainprep", "run", "-d", "data", "--identity", "--affine"]).is_err());
        assert!(Cli::try_parse_from(["brainprep", "run"]).is_err());
    }

    #[test]
    fn test_discover_command() {
        let cli = Cli::try_parse_from(["brainprep", "--log-file", "x.log", "discover", "-d", "data"]).unwrap();
        assert_eq!(cli.log_file, Some(PathBuf::from("x.log")));
        assert!(matches!(cli.command, Commands::Discover { .. }));
    }
}
