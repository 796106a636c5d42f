use clap::arg_enum;
use ips_patcher::archive::{
    patch_entries, read_file, write_file, ArchiveReader, Bundle, DirectoryArchive,
};
use ips_patcher::patch::Patch;
use ips_patcher::{AssociationTable, Crc32, Fingerprint, Manifest, PatchSelector};
use ips_patcher::{Patcher, Result, Terminator};
use log::{debug, info};
use std::path::PathBuf;
use std::process;
use structopt::StructOpt;

arg_enum! {
    #[derive(Debug, Clone, Copy)]
    enum TerminatorMode {
        Strict,
        Lenient
    }
}

impl From<TerminatorMode> for Terminator {
    fn from(mode: TerminatorMode) -> Self {
        match mode {
            TerminatorMode::Strict => Terminator::Required,
            TerminatorMode::Lenient => Terminator::Optional,
        }
    }
}

#[derive(Debug, StructOpt)]
#[structopt(name = "ipspatch", about = "Applies classic IPS patches to binary images")]
struct Options {
    /// Increases log verbosity (-v, -vv, -vvv)
    #[structopt(short, long, parse(from_occurrences))]
    verbose: u8,
    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
struct EngineOptions {
    /// Whether the "EOF" marker must be present
    #[structopt(
        long,
        possible_values = &TerminatorMode::variants(),
        case_insensitive = true,
        default_value = "Strict"
    )]
    terminator: TerminatorMode,
    /// Largest output, in bytes, a patch may produce
    #[structopt(long)]
    max_size: Option<usize>,
}

impl EngineOptions {
    fn patcher(&self) -> Patcher {
        let patcher = Patcher::new().terminator(self.terminator.into());
        match self.max_size {
            Some(limit) => patcher.max_target_size(limit),
            None => patcher,
        }
    }
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Applies one or more patches, in order, to an image
    Apply {
        #[structopt(name = "IMAGE", parse(from_os_str))]
        image: PathBuf,
        #[structopt(name = "PATCH", required = true, parse(from_os_str))]
        patches: Vec<PathBuf>,
        #[structopt(short, long, parse(from_os_str))]
        output: PathBuf,
        #[structopt(flatten)]
        engine: EngineOptions,
    },
    /// Prints the records of a patch as JSON
    Inspect {
        #[structopt(name = "PATCH", parse(from_os_str))]
        patch: PathBuf,
        #[structopt(flatten)]
        engine: EngineOptions,
    },
    /// Prints the CRC32 fingerprint of each file
    Fingerprint {
        #[structopt(name = "FILE", required = true, parse(from_os_str))]
        files: Vec<PathBuf>,
    },
    /// Finds the patch matching an image's fingerprint and applies it
    Select {
        #[structopt(name = "IMAGE", parse(from_os_str))]
        image: PathBuf,
        /// JSON object mapping fingerprints to patch names
        #[structopt(long, parse(from_os_str))]
        manifest: PathBuf,
        /// Directory holding the patches named by the manifest
        #[structopt(long, parse(from_os_str), required_unless = "bundle", conflicts_with = "bundle")]
        dir: Option<PathBuf>,
        /// Bundle holding the patches named by the manifest
        #[structopt(long, parse(from_os_str))]
        bundle: Option<PathBuf>,
        #[structopt(short, long, parse(from_os_str))]
        output: PathBuf,
        #[structopt(flatten)]
        engine: EngineOptions,
    },
    /// Packs every IPS patch below a directory into one bundle file
    Bundle {
        #[structopt(name = "DIR", parse(from_os_str))]
        dir: PathBuf,
        #[structopt(short, long, parse(from_os_str))]
        output: PathBuf,
    },
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Apply {
            image,
            patches,
            output,
            engine,
        } => {
            let original = read_file(&image)?;
            let patches = patches
                .iter()
                .map(read_file)
                .collect::<Result<Vec<_>>>()?;
            let patched = engine
                .patcher()
                .apply_all(&original, patches.iter().map(Vec::as_slice))?;
            write_file(&output, &patched)?;
            println!(
                "Applied {} patch(es): {} -> {} bytes, wrote {}",
                patches.len(),
                original.len(),
                patched.len(),
                output.display()
            );
        }
        Command::Inspect { patch, engine } => {
            let bytes = read_file(&patch)?;
            let patch = Patch::parse(&bytes, engine.terminator.into())?;
            println!("{}", patch.to_json()?);
        }
        Command::Fingerprint { files } => {
            for path in files {
                let data = read_file(&path)?;
                println!("{}  {}", Crc32.fingerprint(&data), path.display());
            }
        }
        Command::Select {
            image,
            manifest,
            dir,
            bundle,
            output,
            engine,
        } => {
            let manifest = Manifest::read(&manifest)?;
            let archive: Box<dyn ArchiveReader> = match dir {
                Some(dir) => Box::new(DirectoryArchive::new(dir)),
                None => Box::new(Bundle::read(bundle.unwrap_or_default())?),
            };
            let entries = patch_entries(archive.entries()?);
            let table = AssociationTable::from_manifest(&manifest, &entries)?;

            let original = read_file(&image)?;
            let selector = PatchSelector::new(table, Crc32).with_patcher(engine.patcher());
            let association = selector.select(&original)?;
            let patched = selector.apply_association(association, &original)?;
            write_file(&output, &patched)?;
            println!("Applied {}, wrote {}", association.name, output.display());
        }
        Command::Bundle { dir, output } => {
            let entries = patch_entries(DirectoryArchive::new(&dir).entries()?);
            info!("bundling {} patches from {}", entries.len(), dir.display());
            let bundle = Bundle { entries };
            bundle.write(&output)?;
            println!(
                "Patches found: {}, wrote {}",
                bundle.entries.len(),
                output.display()
            );
        }
    }
    Ok(())
}

fn main() {
    let opt = Options::from_args();
    let level = match opt.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Err(e) = run(opt.command) {
        debug!("{:?}", e);
        eprintln!("error: {}", e);
        if let Some(offset) = e.patch_offset() {
            eprintln!("  at patch offset {:#x}", offset);
        }
        process::exit(1);
    }
}
