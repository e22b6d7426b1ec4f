//! An in-process control server for the client tests.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How the fake device treats the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(dead_code)]
pub enum Behaviour {
    /// Answer every request.
    Answer,
    /// Read requests but never reply.
    Silent,
    /// Close the connection after the first request line.
    Hangup,
    /// Answer every request, but only after a delay.
    Late(Duration),
}

/// A device with a couple of blocks, scalar fields and one table.
pub struct FakeDevice {
    scalars: BTreeMap<String, String>,
    table: Vec<String>,
}

impl FakeDevice {
    fn new() -> Self {
        let mut scalars = BTreeMap::new();
        scalars.insert("PCAP.ACTIVE".to_string(), "0".to_string());
        scalars.insert("PCAP.TRIG".to_string(), "PULSE1.OUT".to_string());
        FakeDevice {
            scalars,
            table: vec!["1".to_string(), "2".to_string()],
        }
    }

    fn single(line: &str) -> Vec<String> {
        vec![line.to_string()]
    }

    fn block(lines: &[String]) -> Vec<String> {
        let mut out: Vec<String> = lines.iter().map(|l| format!("!{}", l)).collect();
        out.push(".".to_string());
        out
    }

    /// Reply lines for one request.
    fn answer(&mut self, request: &[String]) -> Vec<String> {
        let first = request[0].as_str();
        if let Some(field) = first.strip_suffix('<').or_else(|| first.strip_suffix("<B")) {
            if field == "SEQ1.TABLE" {
                self.table = request[1..request.len() - 1].to_vec();
                return Self::single("OK");
            }
            return Self::single("ERR No such table");
        }
        match first {
            "*BLOCKS?" => Self::block(&["PCAP 1".to_string(), "SEQ 2".to_string()]),
            "*DESC.PCAP?" => Self::single("OK =Position capture"),
            "*DESC.SEQ?" => Self::single("OK =Sequencer"),
            "SEQ1.TABLE?" | "SEQ1.TABLE.B?" => Self::block(&self.table),
            "*CHANGES.CONFIG?" => {
                let values: Vec<String> = self
                    .scalars
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect();
                Self::block(&values)
            }
            "*CHANGES.TABLE?" => Self::block(&["SEQ1.TABLE<".to_string()]),
            "*CHANGES.ATTR?" | "*CHANGES.METADATA?" => Self::block(&[]),
            "*PCAP.ARM=" => {
                self.scalars.insert("PCAP.ACTIVE".to_string(), "1".to_string());
                Self::single("OK")
            }
            _ => {
                if let Some(field) = first.strip_suffix('?') {
                    return match self.scalars.get(field) {
                        Some(value) => Self::single(&format!("OK ={}", value)),
                        None => Self::single("ERR No such field"),
                    };
                }
                match first.split_once('=') {
                    Some((field, value)) => {
                        self.scalars.insert(field.to_string(), value.to_string());
                        Self::single("OK")
                    }
                    None => Self::single("ERR Unknown command"),
                }
            }
        }
    }

    fn serve(mut self, stream: TcpStream, behaviour: Behaviour) -> Vec<String> {
        let mut received = Vec::new();
        let mut writer = match stream.try_clone() {
            Ok(writer) => writer,
            Err(_) => return received,
        };
        let mut pending_table: Option<Vec<String>> = None;
        for line in BufReader::new(stream).lines() {
            let Ok(line) = line else { break };
            received.push(line.clone());
            match behaviour {
                Behaviour::Silent => continue,
                Behaviour::Hangup => break,
                Behaviour::Late(delay) => thread::sleep(delay),
                Behaviour::Answer => {}
            }
            let request = match pending_table.take() {
                Some(mut lines) => {
                    let done = line.is_empty();
                    lines.push(line);
                    if !done {
                        pending_table = Some(lines);
                        continue;
                    }
                    lines
                }
                None if line.ends_with('<') || line.ends_with("<B") => {
                    pending_table = Some(vec![line]);
                    continue;
                }
                None => vec![line],
            };
            let mut reply = self.answer(&request).join("\n");
            reply.push('\n');
            if writer.write_all(reply.as_bytes()).is_err() {
                break;
            }
        }
        received
    }
}

/// Start a fake device on an ephemeral port serving a single connection.
///
/// The handle yields every line the device received.
pub fn spawn_device(behaviour: Behaviour) -> (u16, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake device");
    let port = listener.local_addr().expect("local addr").port();
    let handle = thread::spawn(move || match listener.accept() {
        Ok((stream, _)) => FakeDevice::new().serve(stream, behaviour),
        Err(_) => Vec::new(),
    });
    (port, handle)
}
