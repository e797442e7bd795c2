use std::io::{self, Write};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::info;
use schemars::schema_for;

use aln::Aln;
use aln::streams::{CsvFileStream, SampleStream};
use aln::training::{
    CurveFormat, LearningCurve, TrainConfig, TrainEvent, TrainReport, TrainStatus,
};
use aln::ui::cli::args::{Cli, Command, EvalArgs, FitArgs};
use aln::ui::cli::status::style::*;
use aln::ui::cli::status::{render_loop, sci, timestamp};

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Fit(args) => fit(args),
        Command::Eval(args) => eval(args),
        Command::Schema => {
            let schema = schema_for!(TrainConfig);
            println!("{}", serde_json::to_string_pretty(&schema)?);
            Ok(())
        }
    }
}

fn fit(args: FitArgs) -> Result<()> {
    let config = args.train_config()?;
    let mode = args.error_mode()?;

    let mut stream = CsvFileStream::new(&args.data)
        .with_context(|| format!("failed to open {}", args.data.display()))?;
    let dim = stream.dimension();
    let output = args.output_column.unwrap_or(dim - 1);

    let capacity = match args.capacity {
        Some(c) => c as usize,
        None => {
            let mut rows = 0;
            while stream.next_sample()?.is_some() {
                rows += 1;
            }
            stream.restart()?;
            rows.max(1)
        }
    };

    let mut model = Aln::new(dim, output).context("failed to construct model")?;
    for b in &args.bounds {
        model.set_bound(b.var, 0, b.kind, b.value)
            .with_context(|| format!("invalid bound {}:{}={}", b.var, b.kind, b.value))?;
    }
    if let Some(n) = args.root_children {
        let root = model.tree().root();
        model.add_children(root, args.root_kind, n as usize)?;
    }
    model.configure_buffer(capacity, mode)?;
    let loaded = model.load_stream(&mut stream).context("failed to load samples")?;
    if args.reduce_noise {
        model.reduce_noise_variance()?;
    }
    info!("loaded {loaded} samples from {}", args.data.display());

    let header: Vec<String> = vec![
        format!("{BOLD}{FG_CYAN}▶ ALN fit{RESET}  {DIM}{}{RESET}", args.data.display()),
        format!(
            "{DIM}samples={loaded}{RESET}  {DIM}dim={dim}{RESET}  {DIM}output={output}{RESET}  {DIM}lr={}{RESET}  {}",
            config.learn_rate,
            timestamp()
        ),
        format!(
            "{FG_GREY}────────────────────────────────────────────────────────────────────────{RESET}"
        ),
    ];

    let total_epochs = args.rounds as usize * config.max_epochs;
    let (tx, rx) = std::sync::mpsc::channel();
    let render: JoinHandle<()> = std::thread::spawn(move || {
        render_loop(rx, &header, Duration::from_millis(150), total_epochs)
    });

    let mut curve = LearningCurve::default();
    let mut last: Option<TrainReport> = None;
    {
        let mut observer = move |e: &TrainEvent<'_>| {
            if let TrainEvent::EpochEnd(info) = e {
                let _ = tx.send((*info).clone());
            }
            true
        };
        for round in 0..args.rounds {
            let round_config = TrainConfig {
                seed: config.seed.wrapping_add(round),
                ..config.clone()
            };
            let mut report = model
                .train(&round_config, &mut observer)
                .context("training failed")?;
            curve.extend(std::mem::take(&mut report.curve));
            let done = matches!(
                report.status,
                TrainStatus::Converged | TrainStatus::MinErrorReached
            );
            last = Some(report);
            if done {
                break;
            }
        }
    }
    let _ = render.join();

    if let Some(r) = &last {
        println!(
            "{BOLD}{}{RESET}  {DIM}rms{RESET} {}  {DIM}leaves{RESET} {}  {DIM}splits{RESET} {}  {DIM}cpu{RESET} {:.3}s",
            r.status,
            sci(r.rms_error, 6),
            r.leaf_count,
            model.total_splits(),
            r.cpu_seconds
        );
    }
    for var in (0..dim).filter(|v| *v != output) {
        let name = stream
            .column_names()
            .get(var)
            .cloned()
            .unwrap_or_else(|| format!("x{var}"));
        println!("  {FG_BLUE}{name}{RESET}: {}", model.var_monotonicity(var)?);
    }

    if let Some(var) = args.invert {
        let mono = model
            .invert(var)
            .with_context(|| format!("cannot invert the model on column {var}"))?;
        println!("  {FG_BLUE}inverted{RESET} on column {var} ({mono}), now the output");
    }

    if let Some(path) = &args.save {
        model.save(path)
            .with_context(|| format!("failed to save model to {}", path.display()))?;
    }
    if let Some(path) = args.dump_file.as_ref().filter(|p| !p.as_os_str().is_empty()) {
        let format = args
            .dump_format
            .unwrap_or_else(|| CurveFormat::from_path(path));
        curve
            .export(path, format)
            .with_context(|| format!("failed to export learning curve to {}", path.display()))?;
    }

    Ok(())
}

fn eval(args: EvalArgs) -> Result<()> {
    let model = Aln::load(&args.model)
        .with_context(|| format!("failed to load model from {}", args.model.display()))?;
    let mut stream = CsvFileStream::new(&args.data)
        .with_context(|| format!("failed to open {}", args.data.display()))?;
    if stream.dimension() != model.dimension() {
        bail!(
            "{} has {} columns but the model expects {}",
            args.data.display(),
            stream.dimension(),
            model.dimension()
        );
    }

    let output = model.output_index();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "value,leaf,error")?;
    let (mut rows, mut sq_sum) = (0usize, 0.0);
    while let Some(row) = stream.next_sample()? {
        let e = if args.exhaustive {
            model.evaluate_exhaustive(&row)?
        } else {
            model.evaluate(&row)?
        };
        let err = e.value - row[output];
        writeln!(out, "{},{},{}", e.value, e.leaf.index(), err)?;
        rows += 1;
        sq_sum += err * err;
    }
    if rows > 0 {
        eprintln!(
            "{FG_GREEN}{BOLD}rows{RESET} {rows}  {FG_MAGENTA}{BOLD}rms{RESET} {}",
            sci((sq_sum / rows as f64).sqrt(), 6)
        );
    }
    Ok(())
}
