//! Interactive command shell over the client engine.

use std::fmt;

use p2pci_core::stream;
use p2pci_core::wire;
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt};

use crate::client::{CiClient, ClientError, Downloader, Reply};

const PROMPT: &str = "p2p-ci> ";

const USAGE: &str = "commands:
  add <id> <title...>       advertise a resource to the index
  lookup <id>               list peers offering a resource
  list                      list every advertised resource
  get <id> <host> <port>    download a resource from a peer
  help                      show this text
  exit                      leave";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Add { id: u32, title: String },
    Lookup(u32),
    List,
    Get { id: u32, host: String, port: u16 },
    Help,
    Exit,
}

/// Parse one input line. `Ok(None)` for a blank line; `Err` carries a usage hint.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    let Some(word) = line.split_whitespace().next() else {
        return Ok(None);
    };
    let rest = line[word.len()..].trim_start();
    let args: Vec<&str> = rest.split_whitespace().collect();
    let cmd = match word.to_ascii_lowercase().as_str() {
        "add" => {
            let (id, title) = match rest.split_once(char::is_whitespace) {
                Some((id, title)) => (id, title.trim()),
                None => (rest, ""),
            };
            if title.is_empty() {
                return Err("usage: add <id> <title...>".into());
            }
            Command::Add {
                id: parse_id(id)?,
                title: title.to_string(),
            }
        }
        "lookup" => match args.as_slice() {
            [id] => Command::Lookup(parse_id(id)?),
            _ => return Err("usage: lookup <id>".into()),
        },
        "list" => match args.as_slice() {
            [] => Command::List,
            [all] if all.eq_ignore_ascii_case("all") => Command::List,
            _ => return Err("usage: list".into()),
        },
        "get" => match args.as_slice() {
            [id, host, port] => Command::Get {
                id: parse_id(id)?,
                host: host.to_string(),
                port: match port.parse::<u16>() {
                    Ok(p) if p > 0 => p,
                    _ => return Err(format!("invalid port {:?}", port)),
                },
            },
            _ => return Err("usage: get <id> <host> <port>".into()),
        },
        "help" | "?" => Command::Help,
        "exit" | "quit" => Command::Exit,
        other => return Err(format!("unknown command {:?}; type help", other)),
    };
    Ok(Some(cmd))
}

fn parse_id(token: &str) -> Result<u32, String> {
    match token.parse::<u32>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(format!("invalid resource id {:?}", token)),
    }
}

struct ShowReply<'a>(&'a Reply);

impl fmt::Display for ShowReply<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.0.status_line())?;
        for record in &self.0.records {
            writeln!(f, "{}", wire::encode_result_line(record))?;
        }
        Ok(())
    }
}

/// Read commands from `input` until `exit` or EOF. Errors on the index connection end the
/// shell; a failed download is reported and the shell continues.
pub async fn run_shell<I, O>(
    mut input: I,
    output: &mut O,
    client: &mut CiClient,
    downloader: &Downloader,
) -> anyhow::Result<()>
where
    I: AsyncBufRead + Unpin,
    O: AsyncWrite + Unpin,
{
    loop {
        output.write_all(PROMPT.as_bytes()).await?;
        output.flush().await?;
        let Some(line) = stream::read_line(&mut input).await? else {
            return Ok(());
        };
        let cmd = match parse_command(&line) {
            Ok(Some(cmd)) => cmd,
            Ok(None) => continue,
            Err(hint) => {
                output.write_all(format!("{}\n", hint).as_bytes()).await?;
                continue;
            }
        };
        let text = match cmd {
            Command::Exit => return Ok(()),
            Command::Help => format!("{}\n", USAGE),
            Command::Add { id, title } => ShowReply(&client.add(id, &title).await?).to_string(),
            Command::Lookup(id) => ShowReply(&client.lookup(id).await?).to_string(),
            Command::List => ShowReply(&client.list_all().await?).to_string(),
            Command::Get { id, host, port } => match downloader.get(id, &host, port).await {
                Ok(d) => format!("saved {} ({} bytes)\n", d.path.display(), d.bytes),
                Err(ClientError::Rejected { status, reason }) => {
                    format!("{} {} {}\n", p2pci_core::PROTOCOL_VERSION, status.code(), reason)
                }
                Err(e) => format!("get failed: {}\n", e),
            },
        };
        output.write_all(text.as_bytes()).await?;
    }
}
