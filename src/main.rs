use std::{env, process::ExitCode};

use lumbung::{
    config::{EngineConfig, parse_memory},
    mvcc::transaction::IsolationLevel,
    storage::storage_manager::StorageManager,
    types::{Uid, Xid, error::DatabaseError},
};
use rustyline::{DefaultEditor, error::ReadlineError};
use tracing::error;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: lumbung (create | open) <path> [--mem <size>]";
const HISTORY_FILE: &str = ".lumbung_history";

fn read_multiline_command(rl: &mut DefaultEditor) -> rustyline::Result<String> {
    let mut input = String::new();
    let mut prompt = "lumbung> ";

    loop {
        let line = rl.readline(prompt)?;
        let trimmed_line = line.trim_end();

        // a trailing backslash continues the command on the next line
        if let Some(head) = trimmed_line.strip_suffix('\\') {
            input.push_str(head);
            input.push(' ');
            prompt = "      -> ";
        } else {
            input.push_str(trimmed_line);
            break;
        }
    }

    Ok(input)
}

enum Flow {
    Continue,
    Exit,
}

enum CommandError {
    Usage(String),
    Engine(DatabaseError),
}

impl From<DatabaseError> for CommandError {
    fn from(e: DatabaseError) -> Self {
        CommandError::Engine(e)
    }
}

impl From<String> for CommandError {
    fn from(message: String) -> Self {
        CommandError::Usage(message)
    }
}

fn parse_number<T: std::str::FromStr>(arg: Option<&str>, what: &str) -> Result<T, CommandError> {
    let arg = arg.ok_or_else(|| format!("missing {what}"))?;
    arg.parse()
        .map_err(|_| CommandError::Usage(format!("invalid {what} '{arg}'")))
}

struct Shell {
    engine: StorageManager,
    xid: Option<Xid>,
}

impl Shell {
    fn current(&self) -> Result<Xid, CommandError> {
        self.xid
            .ok_or_else(|| CommandError::Usage("no transaction, run 'begin' first".to_string()))
    }

    fn run(&mut self, command: &str) -> Result<Flow, CommandError> {
        let mut words = command.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(Flow::Continue);
        };

        match verb.to_lowercase().as_str() {
            "exit" | "quit" | "q" => return Ok(Flow::Exit),
            "help" | "h" => {
                println!(
                    r#"
Available commands:
  begin [rc|rr]        - Start a transaction (default from config)
  commit               - Commit the current transaction
  abort                - Abort the current transaction
  insert <text>        - Insert a record, prints its uid
  read <uid>           - Read a record
  delete <uid>         - Delete a record
  index <key> <uid>    - Add a key to the primary index
  search <key>         - Look up a key in the primary index
  range <lo> <hi>      - Look up a key range in the primary index
  help, h              - Show this help message
  exit, quit, q        - Exit the shell

Use '\' at the end of a line for multiline input.
"#
                );
            }
            "begin" => self.begin(words.next())?,
            "commit" => self.finish(true)?,
            "abort" => self.finish(false)?,
            "insert" => {
                let xid = self.current()?;
                let text = command.trim_start()[verb.len()..].trim();
                let uid = self.engine.insert_version(xid, text.as_bytes())?;
                println!("uid {uid}");
            }
            "read" => {
                let uid: Uid = parse_number(words.next(), "uid")?;
                let xid = self.current()?;
                match self.engine.read_version(xid, uid)? {
                    Some(data) => println!("{}", String::from_utf8_lossy(&data)),
                    None => println!("(not found)"),
                }
            }
            "delete" => {
                let uid: Uid = parse_number(words.next(), "uid")?;
                let xid = self.current()?;
                let deleted = self.engine.delete_version(xid, uid)?;
                println!("{}", if deleted { "deleted" } else { "(not found)" });
            }
            "index" => {
                let key: u64 = parse_number(words.next(), "key")?;
                let uid: Uid = parse_number(words.next(), "uid")?;
                self.engine.primary_index().insert(key, uid)?;
            }
            "search" => {
                let key: u64 = parse_number(words.next(), "key")?;
                println!("{:?}", self.engine.primary_index().search(key)?);
            }
            "range" => {
                let lo: u64 = parse_number(words.next(), "low key")?;
                let hi: u64 = parse_number(words.next(), "high key")?;
                println!("{:?}", self.engine.primary_index().search_range(lo, hi)?);
            }
            other => {
                return Err(CommandError::Usage(format!(
                    "unknown command '{other}', try 'help'"
                )));
            }
        }
        Ok(Flow::Continue)
    }

    fn begin(&mut self, level: Option<&str>) -> Result<(), CommandError> {
        if let Some(xid) = self.xid {
            return Err(CommandError::Usage(format!("transaction {xid} is still open")));
        }
        let xid = match level {
            Some(level) => {
                let level: IsolationLevel = level.parse()?;
                self.engine.begin_transaction(level)?
            }
            None => self.engine.begin()?,
        };
        self.xid = Some(xid);
        println!("began transaction {xid}");
        Ok(())
    }

    fn finish(&mut self, commit: bool) -> Result<(), CommandError> {
        let xid = self.current()?;
        if commit {
            self.engine.commit(xid)?;
        } else {
            self.engine.abort(xid)?;
        }
        self.xid = None;
        println!("{} transaction {xid}", if commit { "committed" } else { "aborted" });
        Ok(())
    }

    /// Clears a transaction the engine aborted on its own.
    fn clear_aborted(&mut self) -> Result<(), DatabaseError> {
        if let Some(xid) = self.xid.take() {
            self.engine.abort(xid)?;
            println!("transaction {xid} was aborted, run 'begin' again");
        }
        Ok(())
    }
}

fn parse_args() -> Result<(bool, EngineConfig), String> {
    let mut args = env::args().skip(1);
    let create = match args.next().as_deref() {
        Some("create") => true,
        Some("open") => false,
        _ => return Err(USAGE.to_string()),
    };
    let path = args.next().ok_or_else(|| USAGE.to_string())?;
    let mut config = EngineConfig::new(path);
    while let Some(flag) = args.next() {
        match flag.as_str() {
            "--mem" => {
                let value = args.next().ok_or_else(|| USAGE.to_string())?;
                config.memory = parse_memory(&value).map_err(|e| e.to_string())?;
            }
            _ => return Err(USAGE.to_string()),
        }
    }
    Ok((create, config))
}

fn run_shell(engine: StorageManager) -> Result<(), DatabaseError> {
    let mut shell = Shell { engine, xid: None };
    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            error!(error = %e, "failed to start line editor");
            return shell.engine.close();
        }
    };
    let _ = rl.load_history(HISTORY_FILE);

    loop {
        match read_multiline_command(&mut rl) {
            Ok(input) => {
                let command = input.trim().to_string();
                if command.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(&command);
                match shell.run(&command) {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Exit) => break,
                    Err(CommandError::Usage(message)) => println!("Error: {message}"),
                    Err(CommandError::Engine(e)) if e.is_fatal() => return Err(e),
                    Err(CommandError::Engine(e)) => {
                        println!("Error: {e}");
                        if e.is_conflict() {
                            shell.clear_aborted()?;
                        }
                    }
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                error!(error = %e, "line editor failed");
                break;
            }
        }
    }
    let _ = rl.save_history(HISTORY_FILE);

    if let Some(xid) = shell.xid.take() {
        shell.engine.abort(xid)?;
    }
    shell.engine.close()
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lumbung=info")),
        )
        .init();

    let (create, config) = match parse_args() {
        Ok(parsed) => parsed,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::from(2);
        }
    };

    let engine = if create {
        StorageManager::create(config)
    } else {
        StorageManager::open(config)
    };
    match engine.and_then(run_shell) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, fatal = e.is_fatal(), "engine stopped");
            ExitCode::FAILURE
        }
    }
}
