use implicit_als_rs::driver::Driver;
use implicit_als_rs::io::{format_g, load_csr, load_triplets, save_model};
use implicit_als_rs::metrics::implicit_loss;
use implicit_als_rs::train::train;
use implicit_als_rs::{CsrTable, Parameter, TrainingData, TrainingMethod};
use std::path::Path;
use std::process;
use tracing_subscriber::EnvFilter;

fn exit_with_help() -> ! {
    print!(
        "\
Usage: als-train [options] ratings_file [model_file]
options:
-f n_factors : set the number of latent factors (default 10)
-i iterations : set the number of training epochs (default 5)
-a alpha : set the confidence scale, c = 1 + alpha * r (default 40)
-l lambda : set the regularisation parameter (default 0.01)
-p threshold : ratings above threshold count as preferences (default 0)
-s seed : set the seed of the factor initialisation (default 777777)
-m method : set the training method (default 1)
\t0 -- defaultDense\t(ratings expanded to a dense table)
\t1 -- fastCSR\t\t(ratings kept in CSR form)
-n nodes : train with the distributed protocol on n in-process nodes (default 1)
-r format : set the ratings file format (default 0)
\t0 -- CSR\t\t(row offsets, column indices, values; 1-based)
\t1 -- triplets\t\t(user item rating per line; 0-based)
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

fn load_ratings(path: &Path, format: i32) -> Result<CsrTable, implicit_als_rs::AlsError> {
    if format == 1 {
        load_triplets(path)
    } else {
        load_csr(path, None)
    }
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let mut param = Parameter::default();
    let mut n_nodes = 1usize;
    let mut format = 0i32;
    let mut quiet = false;

    let mut i = 1;
    while i < args.len() {
        if !args[i].starts_with('-') {
            break;
        }
        let flag = &args[i];

        // -q takes no argument
        if flag == "-q" {
            quiet = true;
            i += 1;
            continue;
        }

        // All other flags consume the next argument
        i += 1;
        if i >= args.len() || flag.len() != 2 {
            exit_with_help();
        }

        match flag.as_bytes()[1] {
            b'f' => {
                param.n_factors = args[i].parse().unwrap_or_else(|_| exit_with_help());
            }
            b'i' => {
                param.max_iterations = args[i].parse().unwrap_or_else(|_| exit_with_help());
            }
            b'a' => {
                param.alpha = args[i].parse().unwrap_or_else(|_| exit_with_help());
            }
            b'l' => {
                param.lambda = args[i].parse().unwrap_or_else(|_| exit_with_help());
            }
            b'p' => {
                param.preference_threshold =
                    args[i].parse().unwrap_or_else(|_| exit_with_help());
            }
            b's' => {
                param.seed = args[i].parse().unwrap_or_else(|_| exit_with_help());
            }
            b'm' => {
                param.method = TrainingMethod::from_code(args[i].parse().unwrap_or(-1))
                    .unwrap_or_else(|| exit_with_help());
            }
            b'n' => {
                n_nodes = args[i].parse().unwrap_or(0);
                if n_nodes < 1 {
                    eprintln!("number of nodes must be >= 1");
                    exit_with_help();
                }
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

    // Remaining: ratings_file [model_file]
    if i >= args.len() {
        exit_with_help();
    }
    let input_file = &args[i];
    let model_file = if i + 1 < args.len() {
        args[i + 1].clone()
    } else {
        let base = Path::new(input_file)
            .file_name()
            .unwrap_or_default()
            .to_str()
            .unwrap_or("output");
        format!("{}.model", base)
    };

    init_logging(quiet);
    if quiet {
        implicit_als_rs::set_quiet(true);
    }

    let ratings = load_ratings(Path::new(input_file), format).unwrap_or_else(|e| {
        eprintln!("can't open input file {}: {}", input_file, e);
        process::exit(1);
    });

    if let Err(e) = param.validate() {
        eprintln!("ERROR: {}", e);
        process::exit(1);
    }
    if n_nodes > 1 && param.method != TrainingMethod::FastCsr {
        eprintln!("ERROR: distributed training requires method 1 (fastCSR)");
        process::exit(1);
    }

    let result = if n_nodes > 1 {
        Driver::new(param.clone(), n_nodes).train(&ratings)
    } else {
        match param.method {
            TrainingMethod::DefaultDense => {
                let dense = ratings.to_dense();
                train(TrainingData::Dense(&dense), &param)
            }
            TrainingMethod::FastCsr => train(TrainingData::Csr(&ratings), &param),
        }
    };
    let model = result.unwrap_or_else(|e| {
        eprintln!("ERROR: {}", e);
        process::exit(1);
    });

    if !quiet {
        if let Ok(loss) = implicit_loss(&ratings, &model, &param) {
            tracing::info!("objective = {}", format_g(loss));
        }
    }

    save_model(Path::new(&model_file), &model).unwrap_or_else(|e| {
        eprintln!("can't save model to file {}: {}", model_file, e);
        process::exit(1);
    });
}
