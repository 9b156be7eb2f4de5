use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};

use lookalike::catalog::Catalog;
use lookalike::config::{Config, default_db_path};
use lookalike::duplicates::DuplicatesJob;
use lookalike::haar::Weights;
use lookalike::index::Indexer;
use lookalike::jobs::JobEvent;
use lookalike::loader::signature_for_file;
use lookalike::metadata::format_file_size;
use lookalike::reference::ReferencePolicy;
use lookalike::scope::{AlbumTagRelation, images_from_scope};
use lookalike::search::{
    CandidatePool, Query, SearchRestriction, Threshold, best_matches, best_matches_for_signature_text,
    best_matches_with_threshold,
};
use lookalike::store::MetadataProvider;
use lookalike::{AlbumId, Error, ImageId, Result, SketchType};

#[derive(Parser, Debug)]
#[command(name = "lookalike", version, about = "Find similar and duplicate photos")]
struct Cli {
    /// Catalog database
    #[arg(long, env = "LOOKALIKE_DB", global = true)]
    db: Option<PathBuf>,

    /// Threads used by duplicate scans (default: all cores)
    #[arg(long, env = "LOOKALIKE_THREADS", global = true)]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add folders to the catalog and fingerprint their images
    Index {
        #[arg(value_name = "DIR", required = true)]
        dirs: Vec<PathBuf>,
        /// Recompute every fingerprint, not only new or changed ones
        #[arg(long)]
        rebuild: bool,
    },

    /// List catalog images that look like the given file
    Similar {
        image: PathBuf,
        /// Number of results in top-N mode
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
        /// Minimum similarity in percent; switches to window mode
        #[arg(long)]
        min: Option<f64>,
        /// Maximum similarity in percent, window mode only
        #[arg(long, default_value_t = 100.0)]
        max: f64,
        #[arg(long, default_value = "none")]
        restriction: SearchRestriction,
    },

    /// Print the text signature of an image file
    Signature { image: PathBuf },

    /// Search the catalog with a text signature
    Sketch {
        signature: String,
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
        #[arg(long, default_value = "painted")]
        sketch: SketchType,
    },

    /// Find groups of duplicates and save them in the catalog
    Duplicates(DuplicatesArgs),

    /// List the duplicate groups saved by the last scans
    Groups,

    /// Tag catalog images
    Tag {
        name: String,
        #[arg(value_name = "IMAGE", required = true)]
        images: Vec<PathBuf>,
    },

    /// Check and compact the catalog
    Maintain,
}

#[derive(Args, Debug)]
struct DuplicatesArgs {
    /// Album folders to scan (default: the whole catalog)
    #[arg(long = "album", value_name = "DIR")]
    albums: Vec<PathBuf>,
    /// Tags to scan
    #[arg(long = "tag", value_name = "NAME")]
    tags: Vec<String>,
    #[arg(long, default_value = "no-mix")]
    relation: AlbumTagRelation,
    /// Minimum similarity in percent
    #[arg(long, default_value_t = 90.0)]
    min: f64,
    /// Maximum similarity in percent
    #[arg(long, default_value_t = 100.0)]
    max: f64,
    #[arg(long, default_value = "none")]
    restriction: SearchRestriction,
    #[arg(long, default_value = "older-or-larger")]
    policy: ReferencePolicy,
    /// Folders for the prefer-folder and exclude-folder policies
    #[arg(long = "reference-folder", value_name = "DIR")]
    reference_folders: Vec<PathBuf>,
    /// Keep saved groups that this scan did not touch
    #[arg(long)]
    update: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let config = Config {
        db_path: cli.db.clone().unwrap_or_else(default_db_path),
        threads: cli.threads,
        ..Config::default()
    };

    match run(cli.command, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command, mut config: Config) -> Result<()> {
    match command {
        Command::Index { dirs, rebuild } => {
            let catalog = Catalog::open(&config.db_path)?;
            catalog.refresh_availability()?;
            let indexer = Indexer::new(&catalog);
            for dir in &dirs {
                let root = dir.canonicalize()?;
                let report = indexer.index_dir(&root)?;
                println!(
                    "{}: {} images, {} updated, {} fingerprinted, {} failed, {} removed",
                    root.display(),
                    report.files,
                    report.updated,
                    report.fingerprinted,
                    report.failed,
                    report.pruned
                );
            }
            if rebuild {
                let (ok, failed) = indexer.rebuild_all_fingerprints()?;
                println!("Rebuilt {ok} fingerprints, {failed} failed");
            }
        }

        Command::Similar {
            image,
            limit,
            min,
            max,
            restriction,
        } => {
            let catalog = Catalog::open(&config.db_path)?;
            let pool = CandidatePool::build(&catalog, &catalog, None)?;
            let weights = Weights::get(config.sketch);

            let path = image.canonicalize()?;
            let known = catalog.image_id_for_path(&path)?;
            let signature = match known.and_then(|id| pool.get(id)) {
                Some(candidate) => candidate.signature.clone(),
                None => signature_for_file(&path)?,
            };
            let query = match known.and_then(|id| pool.get(id)) {
                Some(candidate) => Query::from_candidate(candidate),
                None => Query::external(&signature),
            };

            let results: Vec<(ImageId, f64)> = match min {
                Some(min) => {
                    config.threshold = Threshold::from_percent(min, max)?;
                    best_matches_with_threshold(&query, &pool, config.threshold, restriction, weights)?
                        .matches
                        .into_iter()
                        .collect()
                }
                // The query itself ranks first when it is in the catalog.
                None => best_matches(query.signature, &pool, limit + usize::from(query.id.is_some()), weights)?
                    .into_iter()
                    .filter(|(id, _)| Some(*id) != query.id)
                    .take(limit)
                    .collect(),
            };
            print_matches(&catalog, &results)?;
        }

        Command::Signature { image } => {
            println!("{}", signature_for_file(&image)?);
        }

        Command::Sketch {
            signature,
            limit,
            sketch,
        } => {
            let catalog = Catalog::open(&config.db_path)?;
            let pool = CandidatePool::build(&catalog, &catalog, None)?;
            let results = best_matches_for_signature_text(signature.trim(), &pool, limit, sketch)?;
            print_matches(&catalog, &results)?;
        }

        Command::Duplicates(args) => {
            config.threshold = Threshold::from_percent(args.min, args.max)?;
            config.restriction = args.restriction;
            config.policy = args.policy;
            find_duplicates(&config, &args)?;
        }

        Command::Groups => {
            let catalog = Catalog::open(&config.db_path)?;
            for search in catalog.duplicate_searches()? {
                println!("{:.1}%", search.similarity * 100.0);
                for id in &search.members {
                    let marker = if *id == search.reference { "*" } else { " " };
                    println!("  {marker} {}", describe(&catalog, *id)?);
                }
            }
        }

        Command::Tag { name, images } => {
            let catalog = Catalog::open(&config.db_path)?;
            let tag = catalog.add_tag(&name)?;
            for image in &images {
                match catalog.image_id_for_path(&image.canonicalize()?)? {
                    Some(id) => catalog.tag_image(id, tag)?,
                    None => log::warn!("{} is not in the catalog", image.display()),
                }
            }
        }

        Command::Maintain => {
            let catalog = Catalog::open(&config.db_path)?;
            catalog.refresh_availability()?;
            let healthy = catalog.integrity_check()?;
            catalog.vacuum()?;
            println!("integrity: {}", if healthy { "ok" } else { "damaged" });
        }
    }
    Ok(())
}

fn find_duplicates(config: &Config, args: &DuplicatesArgs) -> Result<()> {
    let catalog = Catalog::open(&config.db_path)?;
    catalog.refresh_availability()?;

    let albums = album_ids(&catalog, &args.albums)?;
    let mut tags = Vec::with_capacity(args.tags.len());
    for name in &args.tags {
        match catalog.tag_id(name)? {
            Some(tag) => tags.push(tag),
            None => return Err(Error::InvalidArgument(format!("unknown tag: {name}"))),
        }
    }

    let targets: Vec<ImageId> = if albums.is_empty() && tags.is_empty() {
        catalog.image_ids()?
    } else {
        let mut ids: Vec<_> = images_from_scope(&catalog, &albums, &tags, args.relation)?
            .into_iter()
            .collect();
        ids.sort_unstable();
        ids
    };

    let mut options = config.duplicate_options();
    options.reference_folders = album_ids(&catalog, &args.reference_folders)?
        .into_iter()
        .collect::<HashSet<_>>();
    options.is_album_update = args.update;

    let db_path = config.db_path.clone();
    let job = DuplicatesJob::start(move || Catalog::open(&db_path), targets, options)?;

    for event in job.events.iter() {
        match event {
            JobEvent::Progress { processed, total } if processed % 100 == 0 || processed == total => {
                eprint!("\rScanned {processed}/{total}");
            }
            JobEvent::Completed { groups } => eprintln!("\nFound {groups} groups"),
            _ => {}
        }
    }

    let results = job.join()?.into_result()?;
    for (reference, group) in &results.groups {
        println!("{:.1}% {}", group.similarity * 100.0, describe(&catalog, *reference)?);
        for id in group.members.iter().filter(|id| *id != reference) {
            println!("    {}", describe(&catalog, *id)?);
        }
    }
    Ok(())
}

fn album_ids(catalog: &Catalog, dirs: &[PathBuf]) -> Result<Vec<AlbumId>> {
    let mut albums = Vec::with_capacity(dirs.len());
    for dir in dirs {
        match catalog.album_for_dir(&dir.canonicalize()?)? {
            Some(album) => albums.push(album),
            None => {
                return Err(Error::InvalidArgument(format!(
                    "{} is not an indexed folder",
                    dir.display()
                )));
            }
        }
    }
    Ok(albums)
}

fn print_matches(catalog: &Catalog, results: &[(ImageId, f64)]) -> Result<()> {
    let mut sorted = results.to_vec();
    sorted.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    for (id, similarity) in sorted {
        println!("{:6.2}%  {}", similarity * 100.0, describe(catalog, id)?);
    }
    Ok(())
}

fn describe(catalog: &Catalog, id: ImageId) -> Result<String> {
    let path = catalog
        .image_path(id)?
        .unwrap_or_else(|| Path::new("?").join(id.to_string()));
    let size = catalog
        .item_info(id)?
        .map(|info| format_file_size(info.file_size))
        .unwrap_or_default();
    Ok(format!("{} [{size}]", path.display()))
}
