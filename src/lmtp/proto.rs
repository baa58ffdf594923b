//! LMTP protocol state machine
//!
//! [`Connection`] does no I/O of its own: it is fed complete lines and
//! produces the bytes to send back. The server drives it from a socket.

use std::{fmt::Write, mem};

use crate::{config, util};
use super::{handler::Handler, syntax};

/// Data to send to the client
#[derive(Debug)]
pub struct Response {
    pub data: String,
    /// Close the connection after sending `data`
    pub close_connection: bool,
}

impl Response {
    fn new(data: String) -> Self {
        Response { data, close_connection: false }
    }

    fn close(data: String) -> Self {
        Response { data, close_connection: true }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    /// Connected, greeting not yet sent
    Greeting,
    /// Waiting for `LHLO`
    AwaitingLhlo,
    /// Accumulating pipelined commands until `DATA`
    Commands,
    /// Receiving message body
    Data,
    /// Message delivered, waiting for `QUIT` or the next transaction
    PostData,
    Closed,
}

enum Command {
    Data,
    Reset,
    Quit,
    Other,
}

impl Command {
    fn parse(line: &[u8]) -> Self {
        let verb = syntax::verb(line);

        if syntax::strip_terminator(line).len() != verb.len() {
            return Command::Other;
        }

        if verb.eq_ignore_ascii_case(b"DATA") {
            Command::Data
        } else if verb.eq_ignore_ascii_case(b"RSET") {
            Command::Reset
        } else if verb.eq_ignore_ascii_case(b"QUIT") {
            Command::Quit
        } else {
            Command::Other
        }
    }
}

pub struct Connection<'a, H> {
    config: &'a config::Lmtp,
    hostname: &'a str,
    handler: &'a mut H,
    state: State,
    /// Replies to pipelined commands, sent once `DATA` arrives
    pending: Vec<String>,
    /// Has any `RCPT` in the current transaction been accepted?
    has_recipient: bool,
    message: Vec<u8>,
}

impl<'a, H: Handler> Connection<'a, H> {
    pub fn new(config: &'a config::Lmtp, hostname: &'a str, handler: &'a mut H) -> Self {
        Connection {
            config,
            hostname,
            handler,
            state: State::Greeting,
            pending: Vec::new(),
            has_recipient: false,
            message: Vec::new(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Produce the greeting
    pub fn connect(&mut self) -> Response {
        self.state = State::AwaitingLhlo;
        Response::new(reply(format_args!("220 {} LMTP server ready", self.hostname)))
    }

    /// Handle a single line, including its terminator
    ///
    /// Returns `None` when nothing is to be sent yet.
    pub fn line(&mut self, line: &[u8]) -> Option<Response> {
        match self.state {
            State::Greeting | State::Closed => None,
            State::AwaitingLhlo => Some(self.lhlo(line)),
            State::Commands => self.command(line),
            State::Data => self.data(line),
            State::PostData => self.post_data(line),
        }
    }

    /// The client has not sent anything within the idle timeout
    pub fn timeout(&mut self) -> Response {
        log::warn!("Client timed out in state {:?}", self.state);
        self.state = State::Closed;
        Response::close(reply("422 4.5.0 Timeout."))
    }

    /// The client sent a line longer than we are willing to buffer
    pub fn overflow(&mut self) -> Response {
        log::warn!("Client sent an overlong line in state {:?}", self.state);
        self.state = State::Closed;
        Response::close(reply("500 5.5.2 Line too long."))
    }

    /// The client closed its end of the connection
    pub fn disconnect(&mut self) {
        match self.state {
            State::Closed => {}
            State::Data => log::warn!(
                "Client disconnected during DATA, discarding {} bytes", self.message.len()),
            state => log::warn!("Client disconnected without QUIT in state {state:?}"),
        }
        self.state = State::Closed;
    }

    fn lhlo(&mut self, line: &[u8]) -> Response {
        let client = match syntax::lhlo(line) {
            Ok(client) => client,
            Err(_) => {
                log::warn!("Expected LHLO, got {:?}", util::maybe_ascii(line));
                self.state = State::Closed;
                return Response::close(reply("500 5.5.1 You must LHLO me first."));
            }
        };

        log::debug!("LHLO from {}", util::maybe_ascii(client));
        self.start_transaction();

        let mut data = reply(format_args!("250-{}", self.hostname));
        data += &reply("250-PIPELINING");
        data += &reply("250-ENHANCEDSTATUSCODES");
        for extension in &self.config.extensions {
            data += &reply(format_args!("250-{extension}"));
        }
        data += &reply("250 8BITMIME");

        Response::new(data)
    }

    fn start_transaction(&mut self) {
        self.state = State::Commands;
        self.pending.clear();
        self.has_recipient = false;
        self.message.clear();
    }

    /// Take all pending replies in the order their commands arrived
    fn flush(&mut self) -> String {
        self.pending.drain(..).map(reply).collect()
    }

    fn command(&mut self, line: &[u8]) -> Option<Response> {
        match Command::parse(line) {
            Command::Data => {
                let mut data = self.flush();

                if self.has_recipient {
                    self.state = State::Data;
                    data += &reply("354 Start data. End with <CRLF>.<CRLF>.");
                } else {
                    self.start_transaction();
                    data += &reply("503 5.0.0 Need at least one valid recipient.");
                }

                Some(Response::new(data))
            }
            Command::Reset => {
                log::debug!("Discarding {} pending commands", self.pending.len());
                self.start_transaction();
                Some(Response::new(reply("220 2.0.0 Resetting.")))
            }
            Command::Quit => {
                let mut data = self.flush();
                data += &self.quit();
                Some(Response::close(data))
            }
            Command::Other => {
                let command = String::from_utf8_lossy(syntax::strip_terminator(line));
                let response = self.handler.line(&command);

                if syntax::is_recipient(line) && response.starts_with('2') {
                    self.has_recipient = true;
                }

                self.pending.push(response);
                None
            }
        }
    }

    fn data(&mut self, line: &[u8]) -> Option<Response> {
        if syntax::is_end_of_data(line) {
            return Some(self.deliver());
        }

        self.message.extend_from_slice(syntax::unstuff(line));
        self.message.extend_from_slice(b"\r\n");
        None
    }

    fn deliver(&mut self) -> Response {
        let message = mem::take(&mut self.message);

        match self.handler.deliver(&message) {
            Ok(()) => {
                log::info!("Accepted message of {} bytes", message.len());
                self.state = State::PostData;
                Response::new(reply(format_args!("250 2.6.0 {}", self.config.success_message)))
            }
            Err(err) => {
                log::error!("Could not deliver message: {err}");
                self.state = State::Closed;
                Response::close(reply(format_args!("551 5.6.0 {}: {}", err.category(), err)))
            }
        }
    }

    fn post_data(&mut self, line: &[u8]) -> Option<Response> {
        match Command::parse(line) {
            Command::Quit => Some(Response::close(self.quit())),
            _ => {
                self.start_transaction();
                self.command(line)
            }
        }
    }

    fn quit(&mut self) -> String {
        self.state = State::Closed;
        reply(format_args!("221 2.0.0 {} Goodbye.", self.hostname))
    }
}

/// Format a single reply line, terminated with CRLF
fn reply(text: impl std::fmt::Display) -> String {
    let mut line = String::new();
    let _ = write!(line, "{text}");
    let length = line.trim_end_matches(['\r', '\n']).len();
    line.truncate(length);
    line += "\r\n";
    line
}
