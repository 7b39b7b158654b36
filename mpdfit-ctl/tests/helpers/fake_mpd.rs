//! In-process fake MPD daemon for integration tests
//!
//! Speaks enough of the line protocol for the client: greeting, password,
//! ping, status, queue editing, seek/play/pause/stop, search and command
//! lists. Every received line is logged so tests can assert on the exact
//! wire traffic. Faults can be injected per command.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use mpdfit_common::DaemonAddress;
use mpdfit_ctl::SessionSettings;

/// A song in the fake database
#[derive(Debug, Clone)]
pub struct FakeSong {
    pub file: String,
    pub artist: String,
    pub album: String,
    pub title: String,
    pub genre: String,
    pub time: i64,
}

impl FakeSong {
    pub fn new(file: &str, genre: &str, time: i64) -> Self {
        Self {
            file: file.to_string(),
            artist: "Unknown".to_string(),
            album: "Unknown".to_string(),
            title: file.to_string(),
            genre: genre.to_string(),
            time,
        }
    }

    pub fn by(mut self, artist: &str) -> Self {
        self.artist = artist.to_string();
        self
    }

    fn tag(&self, field: &str) -> Option<&str> {
        match field {
            "artist" => Some(&self.artist),
            "album" => Some(&self.album),
            "title" => Some(&self.title),
            "genre" => Some(&self.genre),
            "file" => Some(&self.file),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub id: u32,
    pub song: FakeSong,
}

/// What the fake does when it receives a given command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Close the connection without answering
    Drop,
    /// Never answer
    Stall,
}

/// Mutable daemon state shared with the test
#[derive(Debug, Default)]
pub struct FakeState {
    pub database: Vec<FakeSong>,
    pub queue: Vec<QueueEntry>,
    pub next_id: u32,
    /// "stop", "play" or "pause"
    pub state: String,
    pub song: Option<u32>,
    pub elapsed: Option<f64>,
    pub playlist_version: u32,
    pub password: Option<String>,
    /// Every line received, in order
    pub log: Vec<String>,
    /// Answer this many `status` requests with nothing but `OK`
    pub empty_status: usize,
    /// Fault for a command name, with how many times it fires
    pub faults: Vec<(String, Fault, usize)>,
    pub connections: usize,
}

impl FakeState {
    pub fn enqueue(&mut self, song: FakeSong) -> u32 {
        self.next_id += 1;
        let id = self.next_id;
        self.queue.push(QueueEntry { id, song });
        self.playlist_version += 1;
        id
    }

    /// Arrange for `command` to trigger `fault` the next `times` times
    pub fn inject(&mut self, command: &str, fault: Fault, times: usize) {
        self.faults.push((command.to_string(), fault, times));
    }

    fn take_fault(&mut self, command: &str) -> Option<Fault> {
        let entry = self
            .faults
            .iter_mut()
            .find(|(name, _, remaining)| name == command && *remaining > 0)?;
        entry.2 -= 1;
        Some(entry.1)
    }

    fn execute(&mut self, line: &str) -> Result<Vec<String>, String> {
        let (command, args) = parse_command(line);
        match command.as_str() {
            "ping" | "close" => Ok(Vec::new()),
            "password" => {
                if self.password.as_deref() == args.first().map(String::as_str) {
                    Ok(Vec::new())
                } else {
                    Err("ACK [3@0] {password} incorrect password".to_string())
                }
            }
            "status" => {
                if self.empty_status > 0 {
                    self.empty_status -= 1;
                    return Ok(Vec::new());
                }
                let mut lines = vec![
                    "volume: 100".to_string(),
                    "repeat: 0".to_string(),
                    "random: 0".to_string(),
                    "single: 0".to_string(),
                    "consume: 0".to_string(),
                    format!("playlist: {}", self.playlist_version),
                    format!("playlistlength: {}", self.queue.len()),
                    format!("state: {}", self.state),
                ];
                if let Some(song) = self.song {
                    lines.push(format!("song: {}", song));
                    if let Some(entry) = self.queue.get(song as usize) {
                        lines.push(format!("songid: {}", entry.id));
                        lines.push(format!("duration: {:.3}", entry.song.time as f64));
                    }
                }
                if let Some(elapsed) = self.elapsed {
                    lines.push(format!("elapsed: {:.3}", elapsed));
                }
                Ok(lines)
            }
            "playlistinfo" => Ok(self
                .queue
                .iter()
                .enumerate()
                .flat_map(|(pos, entry)| queue_record(pos, entry))
                .collect()),
            "currentsong" => Ok(self
                .song
                .and_then(|pos| self.queue.get(pos as usize).map(|entry| (pos, entry)))
                .map(|(pos, entry)| queue_record(pos as usize, entry))
                .unwrap_or_default()),
            "clear" => {
                self.queue.clear();
                self.song = None;
                self.elapsed = None;
                self.state = "stop".to_string();
                self.playlist_version += 1;
                Ok(Vec::new())
            }
            "add" => {
                let path = args.first().cloned().unwrap_or_default();
                match self.database.iter().find(|song| song.file == path).cloned() {
                    Some(song) => {
                        self.enqueue(song);
                        Ok(Vec::new())
                    }
                    None => Err("ACK [50@0] {add} No such directory".to_string()),
                }
            }
            "deleteid" => {
                let id: u32 = args.first().and_then(|a| a.parse().ok()).unwrap_or(0);
                match self.queue.iter().position(|entry| entry.id == id) {
                    Some(index) => {
                        self.queue.remove(index);
                        self.playlist_version += 1;
                        Ok(Vec::new())
                    }
                    None => Err("ACK [50@0] {deleteid} No such song".to_string()),
                }
            }
            "seek" => {
                let song: Option<u32> = args.first().and_then(|a| a.parse().ok());
                let elapsed: Option<f64> = args.get(1).and_then(|a| a.parse().ok());
                match (song, elapsed) {
                    (Some(song), Some(elapsed)) if (song as usize) < self.queue.len() => {
                        self.song = Some(song);
                        self.elapsed = Some(elapsed);
                        Ok(Vec::new())
                    }
                    _ => Err("ACK [2@0] {seek} Bad song index".to_string()),
                }
            }
            "play" => {
                if self.queue.is_empty() {
                    return Ok(Vec::new());
                }
                if self.song.is_none() {
                    self.song = Some(0);
                }
                if self.elapsed.is_none() {
                    self.elapsed = Some(0.0);
                }
                self.state = "play".to_string();
                Ok(Vec::new())
            }
            "pause" => {
                self.state = "pause".to_string();
                Ok(Vec::new())
            }
            "stop" => {
                self.state = "stop".to_string();
                Ok(Vec::new())
            }
            "search" => {
                let field = args.first().cloned().unwrap_or_default();
                let query = args.get(1).cloned().unwrap_or_default().to_lowercase();
                let matches = |song: &FakeSong| {
                    if field == "any" {
                        ["artist", "album", "title", "genre", "file"]
                            .iter()
                            .filter_map(|f| song.tag(f))
                            .any(|tag| tag.to_lowercase().contains(&query))
                    } else {
                        song.tag(&field)
                            .map_or(false, |tag| tag.to_lowercase().contains(&query))
                    }
                };
                Ok(self
                    .database
                    .iter()
                    .filter(|song| matches(song))
                    .flat_map(|song| {
                        vec![
                            format!("file: {}", song.file),
                            format!("Time: {}", song.time),
                            format!("duration: {:.3}", song.time as f64),
                            format!("Artist: {}", song.artist),
                            format!("Genre: {}", song.genre),
                        ]
                    })
                    .collect())
            }
            other => Err(format!("ACK [5@0] {{}} unknown command \"{}\"", other)),
        }
    }
}

fn queue_record(pos: usize, entry: &QueueEntry) -> Vec<String> {
    vec![
        format!("file: {}", entry.song.file),
        format!("Time: {}", entry.song.time),
        format!("duration: {:.3}", entry.song.time as f64),
        format!("Pos: {}", pos),
        format!("Id: {}", entry.id),
    ]
}

/// Split a command line into its name and unquoted arguments
fn parse_command(line: &str) -> (String, Vec<String>) {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c == ' ' {
            chars.next();
            continue;
        }
        let mut token = String::new();
        if c == '"' {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            token.push(escaped);
                        }
                    }
                    '"' => break,
                    other => token.push(other),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ' ' {
                    break;
                }
                token.push(c);
                chars.next();
            }
        }
        tokens.push(token);
    }
    let command = if tokens.is_empty() {
        String::new()
    } else {
        tokens.remove(0)
    };
    (command, tokens)
}

/// Running fake daemon
pub struct FakeMpd {
    addr: SocketAddr,
    state: Arc<Mutex<FakeState>>,
    handle: JoinHandle<()>,
}

impl FakeMpd {
    /// Listen on an ephemeral localhost port
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind fake daemon");
        let addr = listener.local_addr().expect("Fake daemon has no address");
        let state = Arc::new(Mutex::new(FakeState {
            state: "stop".to_string(),
            ..FakeState::default()
        }));

        let shared = Arc::clone(&state);
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                shared.lock().unwrap().connections += 1;
                tokio::spawn(serve(stream, Arc::clone(&shared)));
            }
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    /// Fake with `songs` in its database
    pub async fn with_database(songs: Vec<FakeSong>) -> Self {
        let fake = Self::start().await;
        fake.state().database = songs;
        fake
    }

    pub fn address(&self) -> DaemonAddress {
        DaemonAddress::new("127.0.0.1", self.addr.port())
    }

    /// Session settings with fast ping sampling and a short timeout
    pub fn settings(&self) -> SessionSettings {
        SessionSettings::new(self.address())
            .with_timeout(Duration::from_millis(500))
            .with_ping_sampling(2, Duration::from_millis(5))
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Copy of the received lines
    pub fn log(&self) -> Vec<String> {
        self.state().log.clone()
    }

    pub fn clear_log(&self) {
        self.state().log.clear();
    }
}

impl Drop for FakeMpd {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(stream: TcpStream, state: Arc<Mutex<FakeState>>) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    if write_half.write_all(b"OK MPD 0.23.5\n").await.is_err() {
        return;
    }

    let mut batch: Option<Vec<String>> = None;
    while let Ok(Some(line)) = lines.next_line().await {
        state.lock().unwrap().log.push(line.clone());

        if line == "command_list_ok_begin" {
            batch = Some(Vec::new());
            continue;
        }
        if let Some(commands) = batch.as_mut() {
            if line != "command_list_end" {
                commands.push(line);
                continue;
            }
        }

        let commands = match batch.take() {
            Some(commands) => commands,
            None => vec![line.clone()],
        };
        let in_list = line == "command_list_end";

        let mut response = String::new();
        let mut failed = false;
        for command in &commands {
            let (name, _) = parse_command(command);
            let fault = state.lock().unwrap().take_fault(&name);
            match fault {
                Some(Fault::Drop) => return,
                Some(Fault::Stall) => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    return;
                }
                None => {}
            }

            let result = state.lock().unwrap().execute(command);
            match result {
                Ok(lines) => {
                    for l in lines {
                        response.push_str(&l);
                        response.push('\n');
                    }
                    if in_list {
                        response.push_str("list_OK\n");
                    }
                }
                Err(ack) => {
                    response.push_str(&ack);
                    response.push('\n');
                    failed = true;
                    break;
                }
            }
        }
        if !failed {
            response.push_str("OK\n");
        }

        if write_half.write_all(response.as_bytes()).await.is_err() {
            return;
        }
        if line == "close" {
            return;
        }
    }
}

