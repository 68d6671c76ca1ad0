//! CP-013: CLI subcommands: init, validate, plan, graph, apply, kinds, schema.

use crate::core::executor::{self, ApplyConfig};
use crate::core::parser::{self, CompiledStack};
use crate::core::schema;
use crate::core::types::{ResourceKind, ResourceOutcome, StackConfig};
use crate::provider::exec::ExecProvisioner;
use crate::provider::simulated::SimulatedProvisioner;
use crate::provider::Provisioner;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    name = "cloudplan",
    version,
    about = "Declare cloud resources, resolve references, compile a deterministic provisioning plan"
)]
pub struct Cli {
    /// Verbose diagnostics (debug-level logging)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new stack
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate a stack: parse, check schemas, resolve references, compile
    Validate {
        /// Path to stack.yaml
        #[arg(short, long, default_value = "stack.yaml")]
        file: PathBuf,
    },

    /// Show the provisioning plan
    Plan {
        /// Path to stack.yaml
        #[arg(short, long, default_value = "stack.yaml")]
        file: PathBuf,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the dependency edges
    Graph {
        /// Path to stack.yaml
        #[arg(short, long, default_value = "stack.yaml")]
        file: PathBuf,

        /// Emit Graphviz DOT
        #[arg(long)]
        dot: bool,
    },

    /// Provision every resource in plan order
    Apply {
        /// Path to stack.yaml
        #[arg(short, long, default_value = "stack.yaml")]
        file: PathBuf,

        /// Command run once per resource (default: simulated provisioner)
        #[arg(long)]
        hook: Option<String>,

        /// Directory for the provenance event log
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },

    /// List resource kinds with their properties and attributes
    Kinds,

    /// Print the JSON Schema of stack.yaml
    Schema,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Plan { file, json } => cmd_plan(&file, json),
        Commands::Graph { file, dot } => cmd_graph(&file, dot),
        Commands::Apply {
            file,
            hook,
            log_dir,
        } => cmd_apply(&file, hook.as_deref(), log_dir.as_deref()),
        Commands::Kinds => cmd_kinds(),
        Commands::Schema => cmd_schema(),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "cloudplan", &mut std::io::stdout());
            Ok(())
        }
    }
}

const STACK_TEMPLATE: &str = r#"version: "1.0"
name: my-stack
description: "Managed by cloudplan"

params:
  vpc_cidr: 10.0.0.0/16

resources:
  vpc:
    kind: vpc
    properties:
      cidr_block: "{{params.vpc_cidr}}"
      enable_dns_hostnames: true

  subnet:
    kind: subnet
    properties:
      vpc_id: { ref: vpc.id }
      cidr_block: 10.0.1.0/24

outputs:
  vpc_id:
    value: { ref: vpc.id }

policy:
  failure: stop_on_first
  provenance: true
"#;

fn cmd_init(path: &Path) -> Result<(), String> {
    let config_path = path.join("stack.yaml");
    if config_path.exists() {
        return Err(format!("{} already exists", config_path.display()));
    }
    std::fs::create_dir_all(path)
        .map_err(|e| format!("cannot create {}: {}", path.display(), e))?;
    std::fs::write(&config_path, STACK_TEMPLATE)
        .map_err(|e| format!("cannot write {}: {}", config_path.display(), e))?;

    println!("Initialized cloudplan stack at {}", path.display());
    println!("  Created: {}", config_path.display());
    Ok(())
}

/// Parse and validate a stack file, returning errors if invalid.
fn parse_and_validate(file: &Path) -> Result<StackConfig, String> {
    let config = parser::parse_config_file(file)?;
    let errors = parser::validate_config(&config);
    if errors.is_empty() {
        return Ok(config);
    }
    for e in &errors {
        eprintln!("  ERROR: {}", e);
    }
    Err(format!("{} validation error(s)", errors.len()))
}

/// Parse, validate and compile a stack file.
fn load_stack(file: &Path) -> Result<CompiledStack, String> {
    let config = parse_and_validate(file)?;
    parser::compile_stack(&config).map_err(|e| e.to_string())
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let stack = load_stack(file)?;
    println!(
        "OK: {} ({} resources, {} edges, {} waves)",
        stack.name,
        stack.plan.len(),
        stack.graph.edge_count(),
        stack.plan.waves.len()
    );
    Ok(())
}

fn cmd_plan(file: &Path, json: bool) -> Result<(), String> {
    let stack = load_stack(file)?;

    if json {
        let out = serde_json::json!({
            "stack": stack.name,
            "order": stack.plan.order,
            "waves": stack.plan.waves,
            "fingerprint": stack.plan.fingerprint(),
        });
        let text = serde_json::to_string_pretty(&out)
            .map_err(|e| format!("JSON serialize error: {}", e))?;
        println!("{}", text);
        return Ok(());
    }

    print!("{}", render_plan(&stack));
    Ok(())
}

fn render_plan(stack: &CompiledStack) -> String {
    let mut out = format!("Planning: {} ({} resources)\n\n", stack.name, stack.plan.len());
    for (i, wave) in stack.plan.waves.iter().enumerate() {
        out.push_str(&format!("wave {}:\n", i + 1));
        for id in wave {
            if let Some(d) = stack.graph.get(id) {
                out.push_str(&format!("  + {} ({})\n", id, d.kind));
            }
        }
    }
    out.push_str(&format!(
        "\nPlan: {} to provision in {} waves.\nFingerprint: {}\n",
        stack.plan.len(),
        stack.plan.waves.len(),
        stack.plan.fingerprint()
    ));
    out
}

fn cmd_graph(file: &Path, dot: bool) -> Result<(), String> {
    let stack = load_stack(file)?;
    let text = if dot {
        render_dot(&stack)
    } else {
        render_edges(&stack)
    };
    print!("{}", text);
    Ok(())
}

fn edge_label(stack: &CompiledStack, dependent: &str, dependency: &str) -> &'static str {
    if stack.graph.is_reference_edge(dependent, dependency) {
        "ref"
    } else {
        "depends_on"
    }
}

fn render_edges(stack: &CompiledStack) -> String {
    let mut out = String::new();
    for (dependent, dependency) in stack.graph.edges() {
        out.push_str(&format!(
            "{} -> {} ({})\n",
            dependent,
            dependency,
            edge_label(stack, dependent, dependency)
        ));
    }
    out
}

fn render_dot(stack: &CompiledStack) -> String {
    let mut out = format!("digraph \"{}\" {{\n  rankdir=BT;\n", stack.name);
    for d in stack.graph.descriptors() {
        out.push_str(&format!(
            "  \"{}\" [label=\"{}\\n{}\"];\n",
            d.logical_id, d.logical_id, d.kind
        ));
    }
    for (dependent, dependency) in stack.graph.edges() {
        let style = if stack.graph.is_reference_edge(dependent, dependency) {
            ""
        } else {
            " [style=dashed]"
        };
        out.push_str(&format!("  \"{}\" -> \"{}\"{};\n", dependent, dependency, style));
    }
    out.push_str("}\n");
    out
}

fn cmd_apply(file: &Path, hook: Option<&str>, log_dir: Option<&Path>) -> Result<(), String> {
    let stack = load_stack(file)?;
    let mut provisioner: Box<dyn Provisioner> = match hook {
        Some(command) => Box::new(ExecProvisioner::new(command)),
        None => Box::new(SimulatedProvisioner::new()),
    };

    let cfg = ApplyConfig {
        stack: &stack,
        log_dir,
    };
    let report = executor::apply(&cfg, provisioner.as_mut())?;

    for (id, outcome) in &report.outcomes {
        match outcome {
            ResourceOutcome::Failed { error } => println!("  {:<12} {}: {}", outcome, id, error),
            ResourceOutcome::Skipped { blocked_by } => {
                println!("  {:<12} {} (blocked by {})", outcome, id, blocked_by)
            }
            _ => println!("  {:<12} {}", outcome, id),
        }
    }

    if !report.outputs.is_empty() {
        println!();
        println!("Outputs:");
        for (name, value) in &report.outputs {
            let shown = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            println!("  {} = {}", name, shown);
        }
    }

    println!();
    let failed = report.failed();
    if failed > 0 {
        println!(
            "Apply completed with errors: {} provisioned, {} skipped, {} FAILED",
            report.provisioned(),
            report.skipped(),
            failed
        );
        return Err(format!("{} resource(s) failed", failed));
    }
    println!(
        "Apply complete: {} provisioned ({:.1}s).",
        report.provisioned(),
        report.total_duration.as_secs_f64()
    );
    Ok(())
}

fn render_kinds() -> String {
    let mut out = String::new();
    for kind in ResourceKind::ALL {
        let s = schema::schema_for(kind);
        out.push_str(&format!("{}\n", kind));
        for p in s.properties {
            let marker = if p.required { "*" } else { " " };
            out.push_str(&format!("  {} {:<28} {}\n", marker, p.name, p.ty));
        }
        out.push_str(&format!("  -> {}\n", s.attributes.join(", ")));
    }
    out
}

fn cmd_kinds() -> Result<(), String> {
    print!("{}", render_kinds());
    Ok(())
}

fn cmd_schema() -> Result<(), String> {
    let schema = schemars::schema_for!(StackConfig);
    let text =
        serde_json::to_string_pretty(&schema).map_err(|e| format!("JSON serialize error: {}", e))?;
    println!("{}", text);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASTION: &str = include_str!("../../stacks/bastion.yaml");

    fn write_stack(dir: &Path, yaml: &str) -> PathBuf {
        let file = dir.join("stack.yaml");
        std::fs::write(&file, yaml).unwrap();
        file
    }

    #[test]
    fn test_cp013_init_creates_valid_stack() {
        let dir = tempfile::tempdir().unwrap();
        cmd_init(dir.path()).unwrap();
        let file = dir.path().join("stack.yaml");
        assert!(file.exists());
        cmd_validate(&file).unwrap();
        // Second init refuses to overwrite
        assert!(cmd_init(dir.path()).unwrap_err().contains("already exists"));
    }

    #[test]
    fn test_cp013_init_creates_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("infra/net");
        cmd_init(&nested).unwrap();
        assert!(nested.join("stack.yaml").exists());
    }

    #[test]
    fn test_cp013_validate_reports_errors() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_stack(
            dir.path(),
            "version: \"2.0\"\nname: \"\"\nresources: {}\n",
        );
        let err = cmd_validate(&file).unwrap_err();
        assert_eq!(err, "2 validation error(s)");
    }

    #[test]
    fn test_cp013_validate_reports_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_stack(
            dir.path(),
            r#"
version: "1.0"
name: loop
resources:
  a:
    kind: bucket
    depends_on: [b]
  b:
    kind: bucket
    depends_on: [a]
"#,
        );
        let err = cmd_validate(&file).unwrap_err();
        assert_eq!(err, "dependency cycle detected: a -> b -> a");
    }

    #[test]
    fn test_cp013_validate_missing_file() {
        let err = cmd_validate(Path::new("/nonexistent/stack.yaml")).unwrap_err();
        assert!(err.contains("failed to read"));
    }

    #[test]
    fn test_cp013_plan_and_graph() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_stack(dir.path(), BASTION);
        cmd_plan(&file, false).unwrap();
        cmd_plan(&file, true).unwrap();
        cmd_graph(&file, false).unwrap();
        cmd_graph(&file, true).unwrap();
    }

    #[test]
    fn test_cp013_render_plan() {
        let stack = parser::compile_stack(&parser::parse_config(BASTION).unwrap()).unwrap();
        let text = render_plan(&stack);
        assert!(text.starts_with("Planning: bastion (8 resources)"));
        assert!(text.contains("wave 1:\n  + bucket (bucket)\n  + vpc (vpc)\n"));
        assert!(text.contains("  + bastion (instance)"));
        assert!(text.contains(&stack.plan.fingerprint()));
    }

    #[test]
    fn test_cp013_render_edges_and_dot() {
        let stack = parser::compile_stack(&parser::parse_config(BASTION).unwrap()).unwrap();
        let edges = render_edges(&stack);
        assert!(edges.contains("subnet -> vpc (ref)\n"));
        assert!(edges.contains("route_table -> igw (ref)\n"));
        let dot = render_dot(&stack);
        assert!(dot.starts_with("digraph \"bastion\" {"));
        assert!(dot.contains("\"bastion\" -> \"security_group\";"));
        assert!(dot.trim_end().ends_with('}'));
    }

    #[test]
    fn test_cp013_edge_label_depends_on() {
        let stack = parser::compile_stack(
            &parser::parse_config(
                r#"
version: "1.0"
name: dep
resources:
  logs:
    kind: bucket
  data:
    kind: bucket
    depends_on: [logs]
"#,
            )
            .unwrap(),
        )
        .unwrap();
        assert_eq!(render_edges(&stack), "data -> logs (depends_on)\n");
        assert!(render_dot(&stack).contains("\"data\" -> \"logs\" [style=dashed];"));
    }

    #[test]
    fn test_cp013_apply_simulated_with_log() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_stack(dir.path(), BASTION);
        let logs = dir.path().join("logs");
        cmd_apply(&file, None, Some(&logs)).unwrap();
        assert!(logs.join("bastion/events.jsonl").exists());
    }

    #[test]
    fn test_cp013_apply_hook_failure() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_stack(dir.path(), BASTION);
        let err = cmd_apply(&file, Some("exit 1"), None).unwrap_err();
        // stop_on_first: one failure, the rest halted
        assert_eq!(err, "1 resource(s) failed");
    }

    #[test]
    fn test_cp013_render_kinds() {
        let text = render_kinds();
        for kind in ResourceKind::ALL {
            assert!(text.contains(&format!("{}\n", kind)));
        }
        assert!(text.contains("* cidr_block"));
        assert!(text.contains("-> id, arn, public_ip, private_ip, public_dns"));
    }

    #[test]
    fn test_cp013_schema_and_kinds_commands() {
        cmd_schema().unwrap();
        cmd_kinds().unwrap();
        let schema = schemars::schema_for!(StackConfig);
        let json = serde_json::to_value(&schema).unwrap();
        assert!(json["properties"]["resources"].is_object());
    }

    #[test]
    fn test_cp013_cli_parses() {
        let cli = Cli::try_parse_from([
            "cloudplan", "-v", "apply", "-f", "x.yaml", "--hook", "./h.sh", "--log-dir", "l",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Apply {
                file,
                hook,
                log_dir,
            } => {
                assert_eq!(file, PathBuf::from("x.yaml"));
                assert_eq!(hook.as_deref(), Some("./h.sh"));
                assert_eq!(log_dir, Some(PathBuf::from("l")));
            }
            other => panic!("unexpected {other:?}"),
        }
        Cli::command().debug_assert();
    }
}
