use implicit_als_rs::io::{format_g, load_csr, load_model, load_triplets, save_dense_table};
use implicit_als_rs::predict::{predict_ratings, recommend};
use implicit_als_rs::{CsrTable, Model};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::process;
use tracing_subscriber::EnvFilter;

fn exit_with_help() -> ! {
    print!(
        "\
Usage: als-predict [options] model_file output_file
options:
-k n : write the top n recommended items per user instead of all predicted ratings
-x ratings_file : skip items already rated in ratings_file when recommending
-r format : set the format of the -x ratings file, 0 -- CSR, 1 -- triplets (default 0)
-q : quiet mode (no outputs)
"
    );
    process::exit(1);
}

fn init_logging(quiet: bool) {
    let default = if quiet { "warn" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

fn write_recommendations(
    path: &Path,
    model: &Model,
    k: usize,
    exclude: Option<&CsrTable>,
) -> Result<(), implicit_als_rs::AlsError> {
    let mut out = BufWriter::new(File::create(path)?);
    for user in 0..model.n_users() {
        write!(out, "{}", user)?;
        for (item, score) in recommend(model, user, k, exclude)? {
            write!(out, " {}:{}", item, format_g(score))?;
        }
        writeln!(out)?;
    }
    out.flush()?;
    Ok(())
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let mut top_k: Option<usize> = None;
    let mut exclude_file: Option<String> = None;
    let mut format = 0i32;
    let mut quiet = false;

    let mut i = 1;
    while i < args.len() {
        if !args[i].starts_with('-') {
            break;
        }
        let flag = &args[i];

        if flag == "-q" {
            quiet = true;
            i += 1;
            continue;
        }

        i += 1;
        if i >= args.len() || flag.len() != 2 {
            exit_with_help();
        }

        match flag.as_bytes()[1] {
            b'k' => {
                top_k = Some(args[i].parse().unwrap_or_else(|_| exit_with_help()));
            }
            b'x' => {
                exclude_file = Some(args[i].clone());
            }
            b'r' => {
                format = match args[i].parse::<i32>().unwrap_or(-1) {
                    f @ (0 | 1) => f,
                    _ => exit_with_help(),
                };
            }
            _ => {
                eprintln!("Unknown option: {}", flag);
                exit_with_help();
            }
        }
        i += 1;
    }

    // Need exactly 2 remaining args: model_file output_file
    if i + 1 >= args.len() {
        exit_with_help();
    }
    let model_file = &args[i];
    let output_file = &args[i + 1];

    init_logging(quiet);
    if quiet {
        implicit_als_rs::set_quiet(true);
    }

    if exclude_file.is_some() && top_k.is_none() {
        eprintln!("-x requires -k");
        exit_with_help();
    }

    let model = load_model(Path::new(model_file)).unwrap_or_else(|e| {
        eprintln!("can't open model file {}: {}", model_file, e);
        process::exit(1);
    });

    let exclude = exclude_file.map(|f| {
        let path = Path::new(&f);
        let loaded = if format == 1 {
            load_triplets(path)
        } else {
            load_csr(path, Some(model.n_items()))
        };
        loaded.unwrap_or_else(|e| {
            eprintln!("can't open ratings file {}: {}", f, e);
            process::exit(1);
        })
    });

    let result = match top_k {
        Some(k) => write_recommendations(Path::new(output_file), &model, k, exclude.as_ref()),
        None => save_dense_table(Path::new(output_file), &predict_ratings(&model)),
    };
    if let Err(e) = result {
        eprintln!("can't write output file {}: {}", output_file, e);
        process::exit(1);
    }

    if !quiet {
        tracing::info!(
            "predicted {} users x {} items",
            model.n_users(),
            model.n_items()
        );
    }
}
