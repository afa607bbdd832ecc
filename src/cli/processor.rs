use super::commands::{Command, CommandResult};
use crate::dht::KademliaNode;
use colored::*;
use log::{debug, error};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::fs::create_dir_all;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

/// 交互式命令处理器
///
/// 行编辑在单独的线程里进行，读到的行通过通道交给异步的命令循环；
/// 退出时不等待该线程。
pub struct CommandProcessor {
    node: Arc<KademliaNode>,
    history_path: PathBuf,
}

impl CommandProcessor {
    /// 创建新的命令处理器
    pub fn new(node: Arc<KademliaNode>) -> Self {
        let mut history_path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        history_path.push("kadnet");
        history_path.push("history.txt");

        if let Some(parent) = history_path.parent() {
            let _ = create_dir_all(parent);
        }

        Self { node, history_path }
    }

    /// 运行命令循环，直到用户退出或输入结束
    pub async fn run(self) -> anyhow::Result<()> {
        println!("{}", self.welcome_message());

        let (line_tx, mut line_rx) = mpsc::channel::<String>(16);
        let history_path = self.history_path.clone();
        std::thread::spawn(move || {
            if let Err(e) = read_lines(line_tx, history_path) {
                error!("Console input failed: {}", e);
            }
        });

        while let Some(line) = line_rx.recv().await {
            let command = match Command::parse(&line) {
                Ok(command) => command,
                Err(e) => {
                    eprintln!("{} {}", "Error:".red().bold(), e);
                    continue;
                }
            };

            debug!("Executing {:?}", command);
            if !print_result(command.execute(&self.node).await) {
                break;
            }
        }

        Ok(())
    }

    fn welcome_message(&self) -> String {
        format!(
            "\n{}\n{}\n\nType {} for a list of available commands.\n\nNode ID: {}\n",
            format!("kadnet v{}", crate::utils::version()).green().bold(),
            crate::utils::description().cyan(),
            "/help".yellow(),
            self.node.local_node().id.to_string().green()
        )
    }
}

/// 打印命令结果，返回是否继续
fn print_result(result: CommandResult) -> bool {
    match result {
        CommandResult::Success(message) => println!("{} {}", "Success:".green().bold(), message),
        CommandResult::Info(message) => println!("{}", message),
        CommandResult::Warning(message) => println!("{} {}", "Warning:".yellow().bold(), message),
        CommandResult::Error(message) => println!("{} {}", "Error:".red().bold(), message),
        CommandResult::Exit => {
            println!("Exiting...");
            return false;
        }
    }

    true
}

/// 读取用户输入，直到EOF、Ctrl-C或者命令循环退出
fn read_lines(line_tx: mpsc::Sender<String>, history_path: PathBuf) -> anyhow::Result<()> {
    let mut editor = DefaultEditor::new()?;
    let _ = editor.load_history(&history_path);

    loop {
        match editor.readline(&format!("{} ", "kadnet>".green())) {
            Ok(line) => {
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }

                editor.add_history_entry(line.as_str())?;
                if let Err(e) = editor.save_history(&history_path) {
                    debug!("Failed to save command history: {}", e);
                }

                if line_tx.blocking_send(line).is_err() {
                    break;
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => {
                error!("Error reading line: {}", err);
                break;
            }
        }
    }

    Ok(())
}
