//! Pipeline definition loading
//!
//! A pipeline source is a JSON document of the shape:
//!
//! ```json
//! {
//!   "version": 1,
//!   "input": { "reads": "file", "sample": "sample1" },
//!   "groups": [
//!     {
//!       "name": "trim",
//!       "optional": false,
//!       "commands": [
//!         {
//!           "command": "trimmer -i <reads> -o <sample>.trimmed.fastq",
//!           "in": ["reads"],
//!           "out": { "trimmed": "<sample>.trimmed.fastq" },
//!           "options": {}
//!         }
//!       ]
//!     }
//!   ]
//! }
//! ```

use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::DefinitionError;
use crate::pool::{VariablePool, value_to_string};
use crate::template::CommandTemplate;
use metrun_core::paths::absolutize;

/// Kind of a declared pipeline input
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "JsonValue")]
pub enum InputKind {
    /// A path supplied by the user
    File,
    /// Free text; the string is its default value
    Text(String),
}

impl From<JsonValue> for InputKind {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::String(s) if s == "file" => InputKind::File,
            other => InputKind::Text(value_to_string(&other)),
        }
    }
}

// =============================================================================
// Source documents
// =============================================================================

#[derive(Debug, Deserialize)]
struct PipelineSource {
    #[serde(default)]
    version: Option<JsonValue>,
    input: BTreeMap<String, InputKind>,
    groups: Vec<GroupSource>,
}

#[derive(Debug, Deserialize)]
struct GroupSource {
    #[serde(default)]
    name: String,
    #[serde(default)]
    optional: bool,
    #[serde(default)]
    commands: Vec<CommandSource>,
}

#[derive(Debug, Deserialize)]
struct CommandSource {
    command: String,
    #[serde(rename = "in", default)]
    inputs: Vec<String>,
    #[serde(rename = "out", default)]
    outputs: BTreeMap<String, JsonValue>,
    #[serde(default)]
    options: BTreeMap<String, JsonValue>,
}

impl CommandSource {
    fn into_template(self, base_dir: &Path) -> CommandTemplate {
        let outputs = self
            .outputs
            .iter()
            .map(|(key, value)| (key.clone(), value_to_string(value)))
            .collect();
        let options = self
            .options
            .iter()
            .map(|(key, value)| (key.clone(), value_to_string(value)));

        CommandTemplate::new(self.command)
            .with_inputs(self.inputs)
            .with_outputs(outputs)
            .with_options(options, base_dir)
    }
}

// =============================================================================
// Groups
// =============================================================================

/// Named, ordered list of commands that can be switched on or off together
#[derive(Debug, Clone)]
pub struct Group {
    name: String,
    enabled: bool,
    optional: bool,
    commands: Vec<CommandTemplate>,
}

impl Group {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn commands(&self) -> &[CommandTemplate] {
        &self.commands
    }

    /// Enables or disables the group; mandatory groups stay enabled
    pub fn set_enabled(&mut self, enabled: bool) -> Result<(), DefinitionError> {
        if !enabled && !self.optional {
            return Err(DefinitionError::GroupNotOptional(self.name.clone()));
        }
        self.enabled = enabled;
        Ok(())
    }
}

/// A concrete command line produced by resolving a pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommand {
    pub group: String,
    pub line: String,
}

impl ResolvedCommand {
    /// Shell-token split of the command line
    pub fn argv(&self) -> Vec<String> {
        shell_words::split(&self.line)
            .unwrap_or_else(|_| self.line.split_whitespace().map(str::to_string).collect())
    }
}

// =============================================================================
// Pipeline definition
// =============================================================================

/// A loaded pipeline: declared inputs, groups of commands and the seed pool
#[derive(Debug, Clone)]
pub struct PipelineDefinition {
    version: Option<String>,
    inputs: BTreeMap<String, InputKind>,
    groups: Vec<Group>,
    variables: VariablePool,
    base_dir: PathBuf,
}

impl PipelineDefinition {
    /// Loads a pipeline source file
    ///
    /// Relative (`./`) option values are resolved against the current working
    /// directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DefinitionError> {
        let path = path.as_ref();
        let io_error = |source| DefinitionError::Io {
            path: path.to_path_buf(),
            source,
        };

        let src = std::fs::read_to_string(path).map_err(io_error)?;
        let base_dir = std::env::current_dir().map_err(io_error)?;

        let definition = Self::from_json_str(&src, &base_dir)?;
        info!(
            "Loaded pipeline {} ({} groups)",
            path.display(),
            definition.groups.len()
        );
        Ok(definition)
    }

    /// Parses a pipeline source
    ///
    /// # Arguments
    /// * `src` - JSON pipeline document
    /// * `base_dir` - Directory that `./` option values are relative to
    pub fn from_json_str(src: &str, base_dir: &Path) -> Result<Self, DefinitionError> {
        let source: PipelineSource = serde_json::from_str(src)?;

        let version = source.version.as_ref().map(value_to_string);

        let mut variables = VariablePool::new();
        for (name, kind) in &source.input {
            if let InputKind::Text(default) = kind {
                variables.set(name.clone(), default.clone());
            }
        }

        let groups = source
            .groups
            .into_iter()
            .map(|group| Group {
                name: group.name,
                enabled: true,
                optional: group.optional,
                commands: group
                    .commands
                    .into_iter()
                    .map(|command| command.into_template(base_dir))
                    .collect(),
            })
            .collect::<Vec<_>>();

        debug!(
            "Parsed pipeline with {} inputs and {} groups",
            source.input.len(),
            groups.len()
        );

        Ok(Self {
            version,
            inputs: source.input,
            groups,
            variables,
            base_dir: base_dir.to_path_buf(),
        })
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn inputs(&self) -> &BTreeMap<String, InputKind> {
        &self.inputs
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn variables(&self) -> &VariablePool {
        &self.variables
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn group_mut(&mut self, index: usize) -> Result<&mut Group, DefinitionError> {
        self.groups
            .get_mut(index)
            .ok_or(DefinitionError::GroupIndex(index))
    }

    /// Flips a group's enabled flag and returns the new value
    pub fn toggle_group(&mut self, index: usize) -> Result<bool, DefinitionError> {
        let group = self.group_mut(index)?;
        let enabled = !group.enabled;
        group.set_enabled(enabled)?;
        Ok(enabled)
    }

    pub fn set_enabled(&mut self, index: usize, enabled: bool) -> Result<(), DefinitionError> {
        self.group_mut(index)?.set_enabled(enabled)
    }

    /// Seeds or overwrites a pool variable
    pub fn set_variable(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.variables.set(key, value);
    }

    /// Sets a declared input
    ///
    /// File inputs starting with `.` are made absolute against `cwd`.
    pub fn set_input(&mut self, name: &str, value: &str, cwd: &Path) {
        let value = match self.inputs.get(name) {
            Some(InputKind::Text(_)) => value.to_string(),
            _ if value.starts_with('.') => absolutize(cwd, value).to_string_lossy().into_owned(),
            _ => value.to_string(),
        };
        self.variables.set(name, value);
    }

    /// Overrides an option of one command
    pub fn set_option(
        &mut self,
        group: usize,
        command: usize,
        key: &str,
        value: impl Into<String>,
    ) -> Result<(), DefinitionError> {
        self.group_mut(group)?
            .commands
            .get_mut(command)
            .ok_or(DefinitionError::CommandIndex { group, command })?
            .set_option(key, value)
    }

    fn enabled_commands(&self) -> impl Iterator<Item = &CommandTemplate> {
        self.groups
            .iter()
            .filter(|group| group.enabled)
            .flat_map(|group| group.commands.iter())
    }

    /// Keys a command may write back into the pool
    fn requested_keys(&self) -> HashSet<String> {
        let mut requested: HashSet<String> = self.variables.keys().map(str::to_string).collect();
        for command in self.enabled_commands() {
            requested.extend(command.inputs().iter().cloned());
            requested.extend(command.referenced_variables());
        }
        requested
    }

    /// Threads the pool through every enabled command in order
    ///
    /// Each command's resolved line is stored and its outputs are merged into
    /// the pool before the next command resolves. Returns the final pool.
    pub fn update_variables(&mut self) -> VariablePool {
        let requested = self.requested_keys();
        let mut pool = self.variables.clone();

        for group in self.groups.iter_mut().filter(|group| group.enabled) {
            for command in &mut group.commands {
                let updates = command.update(&pool, &requested);
                pool.merge(updates);
            }
        }
        pool
    }

    /// Resolves the pipeline into the command lines of every enabled group
    pub fn resolved_commands(&mut self) -> Vec<ResolvedCommand> {
        self.update_variables();
        self.groups
            .iter()
            .filter(|group| group.enabled)
            .flat_map(|group| {
                group.commands.iter().map(|command| ResolvedCommand {
                    group: group.name.clone(),
                    line: command.command_line(),
                })
            })
            .collect()
    }

    /// Distinct executables used by the enabled groups, in order of first use
    pub fn tools(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.enabled_commands()
            .filter_map(CommandTemplate::tool_name)
            .filter(|tool| seen.insert(tool.to_string()))
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PIPELINE: &str = r#"{
        "version": "0.2",
        "input": { "reads": "file", "sample": "sample1", "threads": 4 },
        "groups": [
            {
                "name": "trim",
                "commands": [
                    {
                        "command": "trimmer -i <reads> -o <sample>.trimmed.fastq",
                        "in": ["reads"],
                        "out": { "trimmed": "<sample>.trimmed.fastq" }
                    }
                ]
            },
            {
                "name": "classify",
                "optional": true,
                "commands": [
                    {
                        "command": "kraken <trimmed> [--threads <threads>] [--db <db>]",
                        "in": ["trimmed"],
                        "options": { "db": "./k2db" }
                    }
                ]
            }
        ]
    }"#;

    fn definition() -> PipelineDefinition {
        PipelineDefinition::from_json_str(PIPELINE, Path::new("/work")).unwrap()
    }

    #[test]
    fn test_inputs_seed_text_defaults() {
        let definition = definition();
        assert_eq!(definition.version(), Some("0.2"));
        assert_eq!(definition.inputs().get("reads"), Some(&InputKind::File));
        assert_eq!(definition.variables().get("sample"), Some("sample1"));
        assert_eq!(definition.variables().get("threads"), Some("4"));
        assert!(!definition.variables().contains("reads"));
    }

    #[test]
    fn test_outputs_flow_into_later_steps() {
        let mut definition = definition();
        definition.set_input("reads", "./r.fq", Path::new("/data"));

        let lines: Vec<String> = definition
            .resolved_commands()
            .into_iter()
            .map(|command| command.line)
            .collect();

        assert_eq!(
            lines,
            [
                "trimmer -i /data/r.fq -o sample1.trimmed.fastq",
                "kraken sample1.trimmed.fastq --threads 4 --db /work/k2db",
            ]
        );
    }

    #[test]
    fn test_update_variables_returns_threaded_pool() {
        let mut definition = definition();
        definition.set_variable("reads", "r.fq");

        let pool = definition.update_variables();
        assert_eq!(pool.get("trimmed"), Some("sample1.trimmed.fastq"));
        assert!(!definition.variables().contains("trimmed"));
    }

    #[test]
    fn test_disabled_groups_are_skipped() {
        let mut definition = definition();
        assert!(!definition.toggle_group(1).unwrap());

        let commands = definition.resolved_commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].group, "trim");
        assert_eq!(definition.tools(), ["trimmer"]);

        assert!(definition.toggle_group(1).unwrap());
        assert_eq!(definition.tools(), ["trimmer", "kraken"]);
    }

    #[test]
    fn test_mandatory_groups_cannot_be_disabled() {
        let mut definition = definition();
        assert!(matches!(
            definition.toggle_group(0),
            Err(DefinitionError::GroupNotOptional(name)) if name == "trim"
        ));
        assert!(definition.groups()[0].is_enabled());
        assert!(matches!(
            definition.set_enabled(7, false),
            Err(DefinitionError::GroupIndex(7))
        ));
    }

    #[test]
    fn test_set_option_overrides_default() {
        let mut definition = definition();
        definition.set_variable("reads", "r.fq");
        definition.set_option(1, 0, "db", "/opt/db").unwrap();

        let commands = definition.resolved_commands();
        assert!(commands[1].line.ends_with("--db /opt/db"));

        assert!(matches!(
            definition.set_option(1, 3, "db", "x"),
            Err(DefinitionError::CommandIndex { group: 1, command: 3 })
        ));
        assert!(matches!(
            definition.set_option(1, 0, "memory", "x"),
            Err(DefinitionError::UnknownOption { .. })
        ));
    }

    #[test]
    fn test_text_inputs_are_not_absolutised() {
        let mut definition = definition();
        definition.set_input("sample", ".hidden", Path::new("/data"));
        assert_eq!(definition.variables().get("sample"), Some(".hidden"));
    }

    #[test]
    fn test_resolved_command_argv_respects_quotes() {
        let command = ResolvedCommand {
            group: "g".to_string(),
            line: r#"echo "two words" >out.txt"#.to_string(),
        };
        assert_eq!(command.argv(), ["echo", "two words", ">out.txt"]);
    }

    #[test]
    fn test_missing_groups_is_a_parse_error() {
        let result = PipelineDefinition::from_json_str(r#"{ "input": {} }"#, Path::new("/"));
        assert!(matches!(result, Err(DefinitionError::Parse(_))));
    }

    #[test]
    fn test_load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = PipelineDefinition::load(dir.path().join("absent.json"));
        assert!(matches!(result, Err(DefinitionError::Io { .. })));
    }

    #[test]
    fn test_load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        std::fs::write(&path, PIPELINE).unwrap();

        let definition = PipelineDefinition::load(&path).unwrap();
        assert_eq!(definition.groups().len(), 2);
        assert_eq!(definition.groups()[1].name(), "classify");
        assert!(definition.groups()[1].is_optional());
    }
}
