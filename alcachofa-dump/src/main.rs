use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Component, Path, PathBuf};

use alcachofa_core::format::schema::SchemaBlock;
use alcachofa_core::{decompile, CodFile, DecodeOptions, DecompileOptions, EmcFile, Generation};
use alcachofa_nls::{Decoder, Encoding};
use anyhow::{bail, Context, Result};
use clap::Parser as ClapParser;
use serde::{Deserialize, Serialize};

mod render;

/// Dump Alcachofa engine resource files (.EMC) and scripts (.COD)
#[derive(ClapParser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long, required = true)]
    input: PathBuf,

    /// Output directory
    #[arg(short, long, required = true)]
    output: PathBuf,

    #[arg(short, long, default_value = "latin1")]
    lang: Encoding,

    /// Generation of a standalone script
    #[arg(short, long, default_value = "v3")]
    generation: Generation,

    /// Resource file whose schema supplies generation and kernel call names for a script
    #[arg(short, long)]
    types: Option<PathBuf>,

    /// Dump ops instead of decompiling
    #[arg(long)]
    raw_ops: bool,

    /// Interleave every op with the decompiled code
    #[arg(long)]
    dump_instructions: bool,
}

/// Manifest of the artifacts written into the output directory.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DumpProject {
    input: PathBuf,
    lang: Encoding,
    generation: String,
    types_file: Option<PathBuf>,
    objects_file: Option<PathBuf>,
    objects_yaml: Option<PathBuf>,
    scripts: Vec<PathBuf>,
    embedded_files: Vec<PathBuf>,
}

struct Dumper {
    args: Args,
    decode: DecodeOptions,
    decompile: DecompileOptions,
    project: DumpProject,
}

impl Dumper {
    fn new(args: Args) -> Self {
        let decode = DecodeOptions {
            nls: Decoder::new(args.lang),
        };
        let decompile = DecompileOptions {
            dump_instructions: args.dump_instructions,
        };
        let project = DumpProject {
            input: args.input.clone(),
            lang: args.lang,
            ..Default::default()
        };
        Self {
            args,
            decode,
            decompile,
            project,
        }
    }

    fn output(&self, name: impl AsRef<Path>) -> PathBuf {
        self.args.output.join(name)
    }

    fn create(&self, name: impl AsRef<Path>) -> Result<BufWriter<fs::File>> {
        let path = self.output(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = fs::File::create(&path).with_context(|| format!("creating {}", path.display()))?;
        Ok(BufWriter::new(file))
    }

    fn run(&mut self) -> Result<()> {
        fs::create_dir_all(&self.args.output)?;
        let extension = self
            .args
            .input
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("emc") => self.dump_resource()?,
            Some("cod") => self.dump_standalone_script()?,
            _ => bail!("unsupported input file: {}", self.args.input.display()),
        }
        self.write_project()
    }

    fn dump_resource(&mut self) -> Result<()> {
        let input = &self.args.input;
        let bytes = fs::read(input).with_context(|| format!("reading {}", input.display()))?;
        let emc = EmcFile::from_bytes(&bytes, &self.decode).with_context(|| format!("decoding {}", input.display()))?;
        log::info!(
            "{}: {:?}, root {} {:?}",
            input.display(),
            emc.generation(),
            emc.root.type_name,
            emc.root.name
        );
        self.project.generation = format!("{:?}", emc.generation());

        let mut w = self.create("types.txt")?;
        render::write_schema(&mut w, &emc.schema)?;
        w.flush()?;
        self.project.types_file = Some("types.txt".into());

        let mut w = self.create("objects.txt")?;
        render::write_object(&mut w, &emc.root, "")?;
        w.flush()?;
        self.project.objects_file = Some("objects.txt".into());

        let mut w = self.create("objects.yaml")?;
        serde_yaml::to_writer(&mut w, &emc.root)?;
        w.flush()?;
        self.project.objects_yaml = Some("objects.yaml".into());

        for file in &emc.embedded_files {
            let data = emc.embedded_bytes(file, &bytes)?;
            let name = embedded_path(&file.name)?;
            let mut w = self.create(&name)?;
            w.write_all(data)?;
            w.flush()?;
            self.project.embedded_files.push(name);
        }

        for (name, cod) in emc.embedded_scripts(&bytes, &self.decode)? {
            let path = Path::new("scripts").join(format!("{}.txt", name));
            self.write_script(&path, &cod, Some(&emc.schema))?;
        }
        Ok(())
    }

    fn dump_standalone_script(&mut self) -> Result<()> {
        let schema = match &self.args.types {
            Some(path) => {
                let file = fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
                let schema = SchemaBlock::read(&mut BufReader::new(file), &self.decode.nls)
                    .with_context(|| format!("reading schema of {}", path.display()))?;
                schema.require_known_generation()?;
                Some(schema)
            }
            None => None,
        };
        let generation = schema.as_ref().map_or(self.args.generation, |s| s.generation);
        self.project.generation = format!("{:?}", generation);

        let input = &self.args.input;
        let bytes = fs::read(input).with_context(|| format!("reading {}", input.display()))?;
        let cod = CodFile::from_bytes(&bytes, generation, &self.decode)
            .with_context(|| format!("decoding {}", input.display()))?;
        log::info!("{}: {:?}, {} ops", input.display(), generation, cod.ops.len());

        self.write_script(Path::new("script.txt"), &cod, schema.as_ref())
    }

    fn write_script(&mut self, path: &Path, cod: &CodFile, schema: Option<&SchemaBlock>) -> Result<()> {
        let statements = if self.args.raw_ops {
            None
        } else {
            Some(decompile(cod, schema, &self.decompile))
        };
        if let Some(statements) = &statements {
            let diagnostics = statements.iter().filter(|s| s.is_diagnostic()).count();
            if diagnostics > 0 {
                log::warn!("{}: {} decompiler diagnostics", path.display(), diagnostics);
            }
        }

        let mut w = self.create(path)?;
        render::write_script(&mut w, cod, statements.as_deref())?;
        w.flush()?;
        self.project.scripts.push(path.to_path_buf());
        Ok(())
    }

    fn write_project(&self) -> Result<()> {
        let mut w = self.create("project.toml")?;
        let serialized = toml::to_string_pretty(&self.project)?;
        w.write_all(serialized.as_bytes())?;
        w.flush()?;
        Ok(())
    }
}

/// Output path of an embedded file. Names come from the archive and must stay a single plain component.
fn embedded_path(name: &str) -> Result<PathBuf> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(file)), None) => Ok(Path::new("embedded").join(file)),
        _ => bail!("refusing embedded file name {:?}", name),
    }
}

fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let args = Args::parse();
    let mut dumper = Dumper::new(args);
    dumper.run()
}
