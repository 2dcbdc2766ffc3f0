//! Command-line options.
//!
//! Every option, its arity and its default live in [`OPTIONS`]. Arguments are
//! parsed once into a map keyed by flag name, and [`BenchOptions`] pulls typed
//! values out of it.

use std::{fmt::Write as _, path::PathBuf, str::FromStr};

use ahash::AHashMap;
use thiserror::Error;
use tracing::warn;

use crate::mvp_matrix::MAX_LIGHTS;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OptionsError {
    #[error("Option `{0}` expects a value")]
    MissingValue(&'static str),
    #[error("Invalid value `{value}` for option `{name}`: expected {expected}")]
    InvalidValue {
        name: &'static str,
        value: String,
        expected: &'static str,
    },
    #[error("The shader light array holds at most {max} lights, but {requested} were requested")]
    TooManyLights { requested: u32, max: usize },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Arity {
    Flag,
    Value,
}

struct FlagDef {
    name: &'static str,
    arity: Arity,
    default: Option<&'static str>,
    help: &'static str,
}

const OPTIONS: &[FlagDef] = &[
    FlagDef {
        name: "-v",
        arity: Arity::Flag,
        default: None,
        help: "log derived throughput metrics every frame",
    },
    FlagDef {
        name: "--triangles",
        arity: Arity::Value,
        default: Some("2097152"),
        help: "number of triangles in the benchmark grid",
    },
    FlagDef {
        name: "--size",
        arity: Arity::Value,
        default: Some("16"),
        help: "grid cells per axis in each slice",
    },
    FlagDef {
        name: "--lights",
        arity: Arity::Value,
        default: Some("1"),
        help: "lights evaluated by the display pass",
    },
    FlagDef {
        name: "--rotation",
        arity: Arity::Value,
        default: Some("0"),
        help: "animate the model rotation (0|1|true|false)",
    },
    FlagDef {
        name: "-o",
        arity: Arity::Value,
        default: Some("bench3.txt"),
        help: "raw per-frame output file",
    },
    FlagDef {
        name: "--frames",
        arity: Arity::Value,
        default: Some("0"),
        help: "stop after this many frames, 0 runs until the window closes",
    },
    FlagDef {
        name: "--mesh",
        arity: Arity::Value,
        default: None,
        help: "benchmark a Wavefront OBJ mesh instead of the grid",
    },
    FlagDef {
        name: "--texture",
        arity: Arity::Value,
        default: Some("data/grid.png"),
        help: "PNG texture for the textured program",
    },
    FlagDef {
        name: "--shaders",
        arity: Arity::Value,
        default: Some("shaders"),
        help: "directory holding the compiled SPIR-V programs",
    },
    FlagDef {
        name: "--help",
        arity: Arity::Flag,
        default: None,
        help: "print this message",
    },
];

fn flag_def(name: &str) -> Option<&'static FlagDef> {
    let name = if name == "-h" { "--help" } else { name };
    OPTIONS.iter().find(|o| o.name == name)
}

/// Raw arguments, keyed by option name.
#[derive(Debug, Default)]
struct OptionTable {
    values: AHashMap<&'static str, Option<String>>,
    ignored: Vec<String>,
}

impl OptionTable {
    fn parse<I, S>(args: I) -> Result<Self, OptionsError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut table = Self::default();
        let mut args = args.into_iter().map(Into::into);

        while let Some(arg) = args.next() {
            match flag_def(&arg) {
                Some(def) if def.arity == Arity::Flag => {
                    table.values.insert(def.name, None);
                }
                Some(def) => {
                    let value = args.next().ok_or(OptionsError::MissingValue(def.name))?;
                    table.values.insert(def.name, Some(value));
                }
                None => table.ignored.push(arg),
            }
        }

        Ok(table)
    }

    fn flag(&self, name: &'static str) -> bool {
        self.values.contains_key(name)
    }

    fn raw(&self, name: &'static str) -> Option<&str> {
        self.values
            .get(name)
            .and_then(|v| v.as_deref())
            .or_else(|| flag_def(name).and_then(|s| s.default))
    }

    fn value<T: FromStr>(&self, name: &'static str, expected: &'static str) -> Result<T, OptionsError> {
        let raw = self.raw(name).ok_or(OptionsError::MissingValue(name))?;
        raw.parse().map_err(|_| OptionsError::InvalidValue {
            name,
            value: raw.to_owned(),
            expected,
        })
    }

    fn switch(&self, name: &'static str) -> Result<bool, OptionsError> {
        let raw = self.raw(name).ok_or(OptionsError::MissingValue(name))?;
        match raw {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => raw
                .parse::<i64>()
                .map(|v| v != 0)
                .map_err(|_| OptionsError::InvalidValue {
                    name,
                    value: raw.to_owned(),
                    expected: "0, 1, true or false",
                }),
        }
    }
}

/// Settings for one benchmark run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BenchOptions {
    pub verbose: bool,
    pub triangles: u32,
    pub grid_size: u32,
    pub lights: u32,
    pub rotation: bool,
    pub output: PathBuf,
    /// 0 runs until the window is closed.
    pub frames: u32,
    pub mesh: Option<PathBuf>,
    pub texture: PathBuf,
    pub shaders: PathBuf,
    pub help: bool,
}

impl BenchOptions {
    /// Parse options from the arguments following the program name.
    /// Unrecognized arguments are logged and skipped.
    pub fn parse<I, S>(args: I) -> Result<Self, OptionsError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let table = OptionTable::parse(args)?;
        for arg in &table.ignored {
            warn!(%arg, "Ignoring unrecognized argument");
        }

        // Usage is printed whatever else was passed, so other values are
        // not validated.
        if table.flag("--help") {
            return Ok(Self {
                help: true,
                ..Self::parse(std::iter::empty::<String>())?
            });
        }

        let options = Self {
            verbose: table.flag("-v"),
            triangles: table.value("--triangles", "a triangle count")?,
            grid_size: table.value("--size", "a cell count")?,
            lights: table.value("--lights", "a light count")?,
            rotation: table.switch("--rotation")?,
            output: table.value("-o", "a path")?,
            frames: table.value("--frames", "a frame count")?,
            mesh: table.raw("--mesh").map(PathBuf::from),
            texture: table.value("--texture", "a path")?,
            shaders: table.value("--shaders", "a directory")?,
            help: false,
        };

        if options.lights as usize > MAX_LIGHTS {
            return Err(OptionsError::TooManyLights {
                requested: options.lights,
                max: MAX_LIGHTS,
            });
        }

        Ok(options)
    }

    pub fn usage() -> String {
        let mut usage = String::from("usage: raster-bench [options]\n\noptions:\n");
        for def in OPTIONS {
            let name = match def.arity {
                Arity::Flag => def.name.to_owned(),
                Arity::Value => format!("{} <value>", def.name),
            };
            let _ = write!(usage, "  {name:<22} {}", def.help);
            if let Some(default) = def.default {
                let _ = write!(usage, " [default: {default}]");
            }
            usage.push('\n');
        }
        usage
    }
}
