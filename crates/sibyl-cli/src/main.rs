use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, Command, ValueHint};
use sibyl_cli::{input, output};
use sibyl_core::bigraph::DecoyPolicy;
use sibyl_core::grouping::GroupingPolicy;
use sibyl_core::inference::{InferenceEngine, Params};
use sibyl_core::model::GridModel;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::default()
        .filter_level(log::LevelFilter::Error)
        .parse_env(env_logger::Env::default().filter_or("SIBYL_LOG", "error,sibyl_core=info"))
        .init();

    let matches = Command::new("sibyl")
        .version(clap::crate_version!())
        .about("Bayesian protein inference from peptide-spectrum match evidence")
        .arg(
            Arg::new("graph")
                .required(true)
                .help(
                    "Path to the evidence graph: headerless TSV with fields \
                     peptide, posterior error, target|decoy, and a \
                     ';'-separated protein list",
                )
                .value_hint(ValueHint::FilePath),
        )
        .arg(
            Arg::new("parameters")
                .long("parameters")
                .help("JSON file of inference parameters. Flags given here override it.")
                .value_hint(ValueHint::FilePath),
        )
        .arg(
            Arg::new("alpha")
                .short('a')
                .long("alpha")
                .value_parser(value_parser!(f64))
                .help("Associated-emission rate"),
        )
        .arg(
            Arg::new("beta")
                .short('b')
                .long("beta")
                .value_parser(value_parser!(f64))
                .help("Spontaneous-emission (noise) rate"),
        )
        .arg(
            Arg::new("gamma")
                .short('g')
                .long("gamma")
                .value_parser(value_parser!(f64))
                .help("Prior probability that a protein is present"),
        )
        .arg(
            Arg::new("max-log-states")
                .long("max-log-states")
                .value_parser(value_parser!(f64))
                .help("Ceiling on log2(joint activation states) per subgraph"),
        )
        .arg(
            Arg::new("psm-threshold")
                .long("psm-threshold")
                .value_parser(value_parser!(f64))
                .help("Disconnect PSMs below this weight"),
        )
        .arg(
            Arg::new("peptide-threshold")
                .long("peptide-threshold")
                .value_parser(value_parser!(f64))
                .help("Peptides at or below this weight become section boundaries"),
        )
        .arg(
            Arg::new("protein-threshold")
                .long("protein-threshold")
                .value_parser(value_parser!(f64))
                .help("Sever proteins whose best peptide weight is below this"),
        )
        .arg(
            Arg::new("peptide-prior")
                .long("peptide-prior")
                .value_parser(value_parser!(f64))
                .help("Prior probability that a peptide is present"),
        )
        .arg(
            Arg::new("no-grouping")
                .long("no-grouping")
                .action(ArgAction::SetTrue)
                .help("Treat every protein as its own singleton group"),
        )
        .arg(
            Arg::new("distinct-decoys")
                .long("distinct-decoys")
                .action(ArgAction::SetTrue)
                .help("Give decoy peptides their own graph nodes when sequences collide"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .help("Write the ranked list here instead of stdout")
                .value_hint(ValueHint::FilePath),
        )
        .arg(
            Arg::new("peptides")
                .long("peptides")
                .help("Also write peptide-level posteriors to this file")
                .value_hint(ValueHint::FilePath),
        )
        .arg(
            Arg::new("log-likelihood")
                .long("log-likelihood")
                .action(ArgAction::SetTrue)
                .help(
                    "Print the joint log2-likelihood of the evidence under the \
                     given parameters instead of the ranked list",
                ),
        )
        .arg(
            Arg::new("alpha-grid")
                .long("alpha-grid")
                .requires("beta-grid")
                .help(
                    "Alpha range 'min:step:max'. With --beta-grid, evaluate \
                     the log-likelihood surface over the grid instead of the \
                     ranked list",
                ),
        )
        .arg(
            Arg::new("beta-grid")
                .long("beta-grid")
                .requires("alpha-grid")
                .help("Beta range 'min:step:max', companion to --alpha-grid"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Write the ranked list as JSON instead of TSV"),
        )
        .get_matches();

    let mut params = match matches.get_one::<String>("parameters") {
        Some(path) => {
            let file = std::fs::File::open(path)
                .with_context(|| format!("failed to open parameter file {}", path))?;
            serde_json::from_reader::<_, Params>(file)
                .with_context(|| format!("failed to parse parameter file {}", path))?
        }
        None => Params::default(),
    };

    if let Some(&alpha) = matches.get_one::<f64>("alpha") {
        params.alpha = alpha;
    }
    if let Some(&beta) = matches.get_one::<f64>("beta") {
        params.beta = beta;
    }
    if let Some(&gamma) = matches.get_one::<f64>("gamma") {
        params.gamma = gamma;
    }
    if let Some(&ceiling) = matches.get_one::<f64>("max-log-states") {
        params.max_log_states = ceiling;
    }
    if let Some(&t) = matches.get_one::<f64>("psm-threshold") {
        params.thresholds.psm = t;
    }
    if let Some(&t) = matches.get_one::<f64>("peptide-threshold") {
        params.thresholds.peptide = t;
    }
    if let Some(&t) = matches.get_one::<f64>("protein-threshold") {
        params.thresholds.protein = t;
    }
    if let Some(&prior) = matches.get_one::<f64>("peptide-prior") {
        params.peptide_prior = prior;
    }
    if matches.get_flag("no-grouping") {
        params.grouping = GroupingPolicy::Singletons;
    }
    if matches.get_flag("distinct-decoys") {
        params.decoys = DecoyPolicy::Distinct;
    }

    let graph_path = matches
        .get_one::<String>("graph")
        .expect("required argument");
    let psms = input::read_graph(graph_path)?;
    log::info!("read {} scored PSMs from {}", psms.len(), graph_path);

    let mut engine = InferenceEngine::build(&psms, &params)
        .with_context(|| "failed to build the inference graph")?;

    if matches.get_flag("log-likelihood") {
        let model = params.model();
        let log_likelihood = engine
            .log_likelihood(&model)
            .with_context(|| "likelihood evaluation failed")?;
        println!("log2_likelihood\t{}", ryu::Buffer::new().format(log_likelihood));
        return Ok(());
    }

    if let (Some(alpha_spec), Some(beta_spec)) = (
        matches.get_one::<String>("alpha-grid"),
        matches.get_one::<String>("beta-grid"),
    ) {
        let grid = GridModel::new(
            input::parse_range(alpha_spec)?,
            input::parse_range(beta_spec)?,
            params.gamma,
        );
        // a cell where the likelihood is undefined is simply not a candidate
        let surface =
            grid.log_likelihood_surface(|m| engine.log_likelihood(m).unwrap_or(f64::NAN));
        if let Some((row, col, best)) = surface.max_cell() {
            let cell = grid
                .cells()
                .find(|(r, c, _)| *r == row && *c == col)
                .map(|(_, _, m)| m);
            if let Some(m) = cell {
                log::info!(
                    "best grid cell: alpha = {}, beta = {}, log2 likelihood = {}",
                    m.alpha,
                    m.beta,
                    best
                );
            }
        }
        match matches.get_one::<String>("output") {
            Some(path) => {
                let file = std::fs::File::create(path)
                    .with_context(|| format!("failed to create output file {}", path))?;
                output::write_surface(file, &grid, &surface)?;
            }
            None => {
                let stdout = std::io::stdout();
                output::write_surface(stdout.lock(), &grid, &surface)?;
            }
        }
        return Ok(());
    }

    let posteriors = engine
        .posteriors()
        .with_context(|| "posterior computation failed")?;

    if let Some(path) = matches.get_one::<String>("peptides") {
        let peptides = engine
            .peptide_posteriors()
            .with_context(|| "peptide posterior computation failed")?;
        let file = std::fs::File::create(path)
            .with_context(|| format!("failed to create peptide output file {}", path))?;
        output::write_peptide_posteriors(file, &peptides)?;
    }

    let json = matches.get_flag("json");
    match matches.get_one::<String>("output") {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("failed to create output file {}", path))?;
            if json {
                output::write_posteriors_json(file, &posteriors)?;
            } else {
                output::write_posteriors(file, &posteriors)?;
            }
        }
        None => {
            let stdout = std::io::stdout();
            if json {
                output::write_posteriors_json(stdout.lock(), &posteriors)?;
            } else {
                output::write_posteriors(stdout.lock(), &posteriors)?;
            }
        }
    }

    Ok(())
}
