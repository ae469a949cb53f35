use clap::{Args, Parser, Subcommand};
use grow::cache::SpillStore;
use grow::catalogs::{Catalogs, ExtractOptions, FilterOptions, ImportOptions, UpdateOptions};
use grow::config::GrowConfig;
use grow::deploy::{DeployOptions, DeployOutcome, Deployment, DeploymentConfig, LocalDestination};
use grow::indexes::Diff;
use grow::locales::Locale;
use grow::output;
use grow::pod::Pod;
use grow::podspec::Env;
use grow::render::{RenderedDocument, Renderer};
use grow::router::{FilterType, RouteFilter, Router};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Spilled render output, relative to the pod root.
const SPILL_DIR: &str = ".grow/cache/render";

const CACHE_DIR: &str = ".grow/cache";

const DEFAULT_OUT_DIR: &str = "build";

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "grow")]
#[command(about = "Declarative, file-based static site generator")]
#[command(long_about = "\
Declarative, file-based static site generator

A pod is a directory of content, views and translations. Collections under
content/ declare how their documents are routed and rendered; the router
expands every document into one serving path per locale, and the renderer
turns each route into bytes.

Pod structure:

  pod/
  ├── podspec.yaml                     # Locales, static dirs, sitemap, deployments
  ├── content/
  │   └── pages/
  │       ├── _blueprint.yaml          # $path, $view, $localization
  │       ├── hi.yaml                  # Fields only
  │       ├── about.md                 # Front matter + markdown body
  │       └── about@de.md              # Locale-specific override
  ├── views/base.html                  # Tera templates; {{ _(\"Hello\") }} translates
  ├── partials/
  ├── translations/de/LC_MESSAGES/messages.po
  └── source/                          # Static files, routed by podspec static_dirs

Process configuration comes from GROW_* environment variables and ~/.growrc.toml
(or $GROW_RC). Set RUST_LOG=debug for detailed logs.")]
#[command(version = env!("GROW_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render the pod and write it to a directory or a named deployment
    Build(BuildArgs),
    /// Render the pod and deploy it to a named destination
    Deploy(DeployArgs),
    /// Catalog operations: extract, update, import, filter, diff, compile
    Translations {
        #[command(subcommand)]
        command: TranslationsCommand,
    },
    /// Inspect routes and translation state
    Inspect {
        #[command(subcommand)]
        command: InspectCommand,
    },
}

#[derive(Args, Clone)]
struct PodArg {
    /// Pod directory
    #[arg(default_value = ".")]
    pod: PathBuf,
}

#[derive(Args, Clone, Default)]
struct RouteArgs {
    /// Only render these locales (repeatable)
    #[arg(long = "locale")]
    locales: Vec<String>,
    /// Only render routes affected by these pod paths (repeatable)
    #[arg(long = "file")]
    files: Vec<String>,
}

#[derive(Args)]
struct BuildArgs {
    #[command(flatten)]
    pod: PodArg,
    /// Output directory (defaults to <pod>/build)
    #[arg(long)]
    out_dir: Option<PathBuf>,
    /// Write to this deployment's destination instead
    #[arg(long, conflicts_with = "out_dir")]
    deployment: Option<String>,
    #[command(flatten)]
    routes: RouteArgs,
    /// Drop the dependency and render caches first
    #[arg(long)]
    clear_cache: bool,
}

#[derive(Args)]
struct DeployArgs {
    /// Name of a deployment in podspec.yaml
    deployment: String,
    #[command(flatten)]
    pod: PodArg,
    /// Ask before applying changes (default)
    #[arg(long, overrides_with = "noconfirm")]
    confirm: bool,
    /// Apply changes without asking
    #[arg(long)]
    noconfirm: bool,
    /// Test the destination before deploying (default)
    #[arg(long, overrides_with = "notest")]
    test: bool,
    /// Skip the destination test
    #[arg(long)]
    notest: bool,
    /// Only test the destination
    #[arg(long, alias = "test_only")]
    test_only: bool,
    /// Show the diff without applying it
    #[arg(long)]
    dry_run: bool,
    /// Deploy even when required translations are missing
    #[arg(long)]
    force_untranslated: bool,
    #[command(flatten)]
    routes: RouteArgs,
}

#[derive(Subcommand)]
enum TranslationsCommand {
    /// Extract messages into the template (or locale catalogs with --localized)
    Extract {
        #[command(flatten)]
        pod: PodArg,
        #[arg(long = "locale")]
        locales: Vec<String>,
        /// Only read sources matching these globs
        #[arg(long = "path")]
        paths: Vec<String>,
        #[arg(long)]
        localized: bool,
        #[arg(long)]
        include_obsolete: bool,
        #[arg(long)]
        fuzzy_matching: bool,
        /// Report untagged strings instead of extracting
        #[arg(long)]
        audit: bool,
        /// Write the template here instead
        #[arg(short = 'o', long)]
        out: Option<String>,
    },
    /// Merge the template into locale catalogs
    Update {
        #[command(flatten)]
        pod: PodArg,
        #[arg(long = "locale")]
        locales: Vec<String>,
        #[arg(long)]
        fuzzy_matching: bool,
        #[arg(long)]
        include_obsolete: bool,
    },
    /// Import translations from a .po, .zip, .csv or catalog directory
    Import {
        source: PathBuf,
        #[command(flatten)]
        pod: PodArg,
        /// Locale of a single .po source
        #[arg(long)]
        locale: Option<String>,
        /// Only fill messages that have no translation yet
        #[arg(long)]
        untranslated: bool,
        /// Skip messages the pod does not already have
        #[arg(long)]
        no_obsolete: bool,
    },
    /// Write catalogs of untranslated messages
    Filter {
        #[command(flatten)]
        pod: PodArg,
        #[arg(long = "locale")]
        locales: Vec<String>,
        #[arg(long = "path")]
        paths: Vec<String>,
        #[arg(long)]
        localized: bool,
        #[arg(long)]
        include_header: bool,
        #[arg(long)]
        out_dir: Option<String>,
        #[arg(short = 'o', long)]
        out: Option<String>,
    },
    /// Write messages missing from another catalog directory
    Diff {
        /// Pod path of the other catalogs' template
        other: String,
        #[command(flatten)]
        pod: PodArg,
        #[arg(long)]
        out_dir: String,
    },
    /// Compile locale catalogs to MO files
    Compile {
        #[command(flatten)]
        pod: PodArg,
    },
}

#[derive(Subcommand)]
enum InspectCommand {
    /// List every route
    Routes {
        #[command(flatten)]
        pod: PodArg,
    },
    /// Render the pod and report translation lookups
    Stats {
        #[command(flatten)]
        pod: PodArg,
        /// Show every untranslated message
        #[arg(long)]
        full: bool,
    },
    /// List untranslated catalog messages
    Untranslated {
        #[command(flatten)]
        pod: PodArg,
        #[arg(long = "locale")]
        locales: Vec<String>,
        #[arg(long = "path")]
        paths: Vec<String>,
    },
}

fn main() -> CliResult<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let config = GrowConfig::load()?;

    match cli.command {
        Command::Build(args) => build(&config, args)?,
        Command::Deploy(args) => deploy(&config, args)?,
        Command::Translations { command } => translations(&config, command)?,
        Command::Inspect { command } => inspect(&config, command)?,
    }
    Ok(())
}

fn default_env(config: &GrowConfig) -> Env {
    config
        .environment_name
        .as_deref()
        .map(Env::named)
        .unwrap_or_default()
}

fn open_pod(dir: &Path, env: Env) -> CliResult<Arc<Pod>> {
    log::debug!("Opening pod {} ({})", dir.display(), env.name);
    Ok(Arc::new(Pod::open(dir, env)?))
}

/// Router over every route, narrowed by `--locale` and `--file`.
fn routes<'p>(pod: &'p Pod, args: &RouteArgs) -> CliResult<Router<'p>> {
    let mut router = Router::new(pod);
    router.add_all()?;
    if !args.locales.is_empty() {
        router.filter(&RouteFilter {
            filter_type: FilterType::Whitelist,
            locales: args.locales.clone(),
            ..Default::default()
        })?;
    }
    if !args.files.is_empty() {
        let kept = router.filter_changed(&args.files);
        log::info!("{} routes affected by {}", kept, args.files.join(", "));
    }
    Ok(router)
}

fn render(
    pod: &Arc<Pod>,
    config: &GrowConfig,
    router: &Router<'_>,
) -> CliResult<(Vec<RenderedDocument>, Option<Arc<SpillStore>>)> {
    let mut renderer = Renderer::new(Arc::clone(pod)).with_threads(config.render_threads());
    let spill = match pod.root_dir() {
        Some(root) => Some(Arc::new(SpillStore::open(
            root.join(SPILL_DIR),
            config.render.spill_threshold_bytes,
        )?)),
        None => None,
    };
    if let Some(store) = &spill {
        renderer = renderer.with_spill(Arc::clone(store));
    }
    let docs = renderer.render_routes(router)?;
    if let Some(store) = &spill {
        store.save()?;
        let pruned = store.prune()?;
        if pruned > 0 {
            log::debug!("Pruned {} stale render cache files", pruned);
        }
    }
    pod.save_dependencies()?;
    Ok((docs, spill))
}

fn build(config: &GrowConfig, args: BuildArgs) -> CliResult<()> {
    let started = Instant::now();
    let pod_dir = &args.pod.pod;
    if args.clear_cache {
        let cache = pod_dir.join(CACHE_DIR);
        if cache.exists() {
            std::fs::remove_dir_all(&cache)?;
            log::info!("Cleared {}", cache.display());
        }
    }

    let mut env = default_env(config);
    let mut deployment_config = None;
    if let Some(name) = &args.deployment {
        let configured = Pod::open(pod_dir, env.clone())?;
        let named = DeploymentConfig::named(&configured.podspec().deployments(), name)?;
        if let Some(deployment_env) = &named.env {
            env = deployment_env.clone();
        }
        deployment_config = Some(named);
    }
    let pod = open_pod(pod_dir, env)?;
    let router = routes(&pod, &args.routes)?;
    let (docs, spill) = render(&pod, config, &router)?;
    let written = docs.len();

    let (deployment, label) = match &deployment_config {
        Some(named) => {
            let destination = named.open(pod.root_dir())?;
            let label = destination.label();
            (Deployment::new(destination).with_filter(named.path_filter()?), label)
        }
        None => {
            let out_dir = args
                .out_dir
                .clone()
                .unwrap_or_else(|| pod_dir.join(DEFAULT_OUT_DIR));
            let label = out_dir.display().to_string();
            (Deployment::new(Box::new(LocalDestination::new(out_dir))), label)
        }
    };
    let options = DeployOptions {
        confirm: false,
        test: false,
        is_partial: !args.routes.locales.is_empty() || !args.routes.files.is_empty(),
        threads: config.deploy.threads,
        repo: pod.root_dir().map(Path::to_path_buf),
        stats: Some(pod.stats().export()),
        ..Default::default()
    };
    deployment.deploy(docs, &options, &mut |_| true)?;
    output::print_build_summary(written, &label, spill.map(|s| s.stats()), started.elapsed());
    Ok(())
}

fn prompt(diff: &Diff) -> bool {
    output::print_diff(diff);
    print!("Proceed to deploy? [y/N]: ");
    if std::io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    if std::io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

fn deploy(config: &GrowConfig, args: DeployArgs) -> CliResult<()> {
    let pod_dir = &args.pod.pod;
    let configured = Pod::open(pod_dir, default_env(config))?;
    let named = DeploymentConfig::named(&configured.podspec().deployments(), &args.deployment)?;
    let env = named.env.clone().unwrap_or_else(|| default_env(config));
    let pod = open_pod(pod_dir, env)?;

    let destination = named.open(pod.root_dir())?;
    log::info!("Deploying to {} ({})", destination.label(), destination.kind());
    let deployment = Deployment::new(destination).with_filter(named.path_filter()?);

    let mut options = DeployOptions {
        confirm: !args.noconfirm,
        dry_run: args.dry_run,
        test: !args.notest,
        test_only: args.test_only,
        is_partial: !args.routes.locales.is_empty() || !args.routes.files.is_empty(),
        threads: config.deploy.threads,
        repo: pod.root_dir().map(Path::to_path_buf),
        stats: None,
    };
    if args.test_only {
        deployment.deploy(Vec::new(), &options, &mut |_| false)?;
        println!("Destination test passed: {}", deployment.destination().label());
        return Ok(());
    }

    let router = routes(&pod, &args.routes)?;
    let (docs, _) = render(&pod, config, &router)?;

    let require = pod
        .podspec()
        .localization()
        .map(|l| l.require_translations)
        .unwrap_or_default();
    let missing = pod.stats().count_untranslated();
    if require && missing > 0 && !args.force_untranslated {
        output::print_stats(&pod.stats().export(), false);
        return Err(format!(
            "{missing} untranslated messages; translate them or deploy with --force-untranslated"
        )
        .into());
    }
    options.stats = Some(pod.stats().export());

    match deployment.deploy(docs, &options, &mut prompt)? {
        DeployOutcome::Tested => {}
        DeployOutcome::NoChanges(_) => println!("No changes to deploy."),
        DeployOutcome::DryRun(diff) => output::print_diff(&diff),
        DeployOutcome::Declined(_) => println!("Deploy aborted."),
        DeployOutcome::Deployed(diff) => {
            if !options.confirm {
                output::print_diff(&diff);
            }
            println!("Deployed to {}", deployment.destination().label());
        }
    }
    Ok(())
}

fn locales_or(catalogs: &Catalogs<'_>, codes: &[String]) -> CliResult<Vec<Locale>> {
    if codes.is_empty() {
        Ok(catalogs.list_locales()?)
    } else {
        Ok(Locale::parse_list(codes))
    }
}

fn translations(config: &GrowConfig, command: TranslationsCommand) -> CliResult<()> {
    let env = default_env(config);
    match command {
        TranslationsCommand::Extract {
            pod,
            locales,
            paths,
            localized,
            include_obsolete,
            fuzzy_matching,
            audit,
            out,
        } => {
            let pod = open_pod(&pod.pod, env)?;
            let result = pod.catalogs().extract(&ExtractOptions {
                include_obsolete: include_obsolete.then_some(true),
                localized: localized.then_some(true),
                fuzzy: fuzzy_matching.then_some(true),
                locales: Locale::parse_list(&locales),
                paths,
                audit,
                out_path: out,
                ..Default::default()
            })?;
            if audit {
                for (path, string) in &result.untagged {
                    println!("{}: {}", path, string);
                }
                println!("{} untagged strings", result.untagged.len());
            } else {
                for catalog in &result.catalogs {
                    let name = catalog
                        .locale
                        .as_ref()
                        .map(Locale::to_string)
                        .unwrap_or_else(|| "template".to_string());
                    println!("{}: {} messages", name, catalog.len());
                }
            }
        }
        TranslationsCommand::Update {
            pod,
            locales,
            fuzzy_matching,
            include_obsolete,
        } => {
            let pod = open_pod(&pod.pod, env)?;
            let locales = if locales.is_empty() {
                pod.list_locales()
            } else {
                Locale::parse_list(&locales)
            };
            pod.catalogs().update(
                &locales,
                &UpdateOptions {
                    fuzzy: fuzzy_matching.then_some(true),
                    include_obsolete: include_obsolete.then_some(true),
                    ..Default::default()
                },
            )?;
        }
        TranslationsCommand::Import {
            source,
            pod,
            locale,
            untranslated,
            no_obsolete,
        } => {
            let pod = open_pod(&pod.pod, env)?;
            let summary = pod.catalogs().import_translations(
                &source,
                locale.as_deref(),
                ImportOptions {
                    include_obsolete: !no_obsolete,
                    untranslated,
                },
            )?;
            output::print_import(&summary);
        }
        TranslationsCommand::Filter {
            pod,
            locales,
            paths,
            localized,
            include_header,
            out_dir,
            out,
        } => {
            let pod = open_pod(&pod.pod, env)?;
            let catalogs = pod.catalogs();
            let locales = locales_or(&catalogs, &locales)?;
            catalogs.filter(&FilterOptions {
                locales,
                paths,
                localized,
                include_header,
                out_dir,
                out_path: out,
            })?;
        }
        TranslationsCommand::Diff { other, pod, out_dir } => {
            let pod = open_pod(&pod.pod, env)?;
            let theirs = Catalogs::with_template(&pod, &other);
            let counts = pod.catalogs().diff(&theirs, &out_dir)?;
            if counts.is_empty() {
                println!("No differences.");
            }
            for (locale, count) in counts {
                println!("{}: {} messages", locale, count);
            }
        }
        TranslationsCommand::Compile { pod } => {
            let pod = open_pod(&pod.pod, env)?;
            output::print_compile(&pod.catalogs().compile()?);
        }
    }
    Ok(())
}

fn inspect(config: &GrowConfig, command: InspectCommand) -> CliResult<()> {
    let env = default_env(config);
    match command {
        InspectCommand::Routes { pod } => {
            let pod = open_pod(&pod.pod, env)?;
            let router = routes(&pod, &RouteArgs::default())?;
            output::print_routes(&router.concrete_routes());
        }
        InspectCommand::Stats { pod, full } => {
            let pod = open_pod(&pod.pod, env)?;
            let router = routes(&pod, &RouteArgs::default())?;
            render(&pod, config, &router)?;
            output::print_stats(&pod.stats().export(), full);
        }
        InspectCommand::Untranslated { pod, locales, paths } => {
            let pod = open_pod(&pod.pod, env)?;
            let catalogs = pod.catalogs();
            let locales = locales_or(&catalogs, &locales)?;
            output::print_untranslated(&catalogs.list_untranslated(&locales, &paths)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_starts_with_package_version() {
        assert!(env!("GROW_VERSION").starts_with(env!("CARGO_PKG_VERSION")));
        let err = Cli::try_parse_from(["grow", "--version"]).err().unwrap();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
        assert!(err.to_string().contains(env!("GROW_VERSION")));
    }

    #[test]
    fn deploy_flags_parse() {
        let cli = Cli::try_parse_from(["grow", "deploy", "prod", "site", "--noconfirm", "--dry-run"]).unwrap();
        let Command::Deploy(args) = cli.command else {
            panic!("expected deploy");
        };
        assert_eq!(args.deployment, "prod");
        assert_eq!(args.pod.pod, PathBuf::from("site"));
        assert!(args.noconfirm && args.dry_run && !args.test_only);
    }
}
