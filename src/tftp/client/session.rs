use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::time::Duration;

use log::{debug, info, warn};

use super::error::TransferError;
use crate::tftp::core::{
    BLOCK_SIZE, Convert, ErrorCode, Mode, Packet, PacketError, Socket, is_timeout,
};

/// Per-transfer protocol parameters
#[derive(Debug, Clone, Copy)]
pub struct TransferOptions {
    pub mode: Mode,
    /// How long to wait for each reply before retransmitting
    pub timeout: Duration,
    /// Retransmissions of one packet before giving up
    pub max_retries: u8,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            mode: Mode::Octet,
            timeout: Duration::from_secs(5),
            max_retries: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Init,
    AwaitingFirstReply,
    Transmitting,
    Receiving,
    Done,
    Failed,
}

/// Stop-and-wait state machine for a single read or write transfer
///
/// The session owns its socket for the whole transfer. Every reply is awaited
/// with the configured timeout; a timeout or an undecodable datagram causes the
/// last packet to be sent again until `max_retries` is exhausted. Once the first
/// reply arrives, its source address (the server's transfer ID) is the only one
/// accepted for the rest of the transfer.
pub struct TransferSession<S: Socket> {
    socket: S,
    server: SocketAddr,
    mode: Mode,
    max_retries: u8,
    state: State,
    block_num: u16,
    peer: Option<SocketAddr>,
    retries: u8,
    last_sent: Vec<u8>,
    bytes: u64,
    buf: Vec<u8>,
}

impl<S: Socket> TransferSession<S> {
    /// Create a session that will send its request to `server`
    pub fn new(socket: S, server: SocketAddr, options: &TransferOptions) -> io::Result<Self> {
        socket.set_read_timeout(options.timeout)?;
        Ok(Self {
            socket,
            server,
            mode: options.mode,
            max_retries: options.max_retries,
            state: State::Init,
            block_num: 1,
            peer: None,
            retries: 0,
            last_sent: Vec::new(),
            bytes: 0,
            // Larger than any valid packet so oversized datagrams are detected
            buf: vec![0u8; 65536],
        })
    }

    /// Read `filename` from the server into `sink` (RRQ)
    ///
    /// Returns the number of payload bytes received.
    pub fn download<W: Write>(mut self, filename: &str, sink: W) -> Result<u64, TransferError> {
        let result = self.run_download(filename, sink);
        self.finish(result)
    }

    /// Write the contents of `source` to `filename` on the server (WRQ)
    ///
    /// Returns the number of payload bytes sent.
    pub fn upload<R: Read>(mut self, filename: &str, source: R) -> Result<u64, TransferError> {
        let result = self.run_upload(filename, source);
        self.finish(result)
    }

    fn run_download<W: Write>(&mut self, filename: &str, mut sink: W) -> Result<u64, TransferError> {
        let mut convert = Convert::new(self.mode);
        self.request(Packet::Rrq {
            filename: filename.to_string(),
            mode: self.mode,
        })?;

        loop {
            let (packet, from) = self.receive()?;
            match packet {
                Packet::Data { block_num, data } if block_num == self.block_num => {
                    if self.peer.is_none() {
                        self.lock_peer(from);
                        self.set_state(State::Receiving);
                    }

                    let last = data.len() < BLOCK_SIZE;
                    let mut host = match convert.from_wire(&data) {
                        Ok(host) => host,
                        Err(e) => return Err(self.abort(e.into())),
                    };
                    if last {
                        host.extend(convert.finish_from_wire());
                    }
                    if let Err(e) = write_block(&mut sink, &host, last) {
                        return Err(self.abort(e.into()));
                    }

                    self.bytes += data.len() as u64;
                    debug!("Received block {} ({} bytes)", block_num, data.len());
                    self.send(Packet::Ack(block_num))?;
                    self.block_num = self.block_num.wrapping_add(1);

                    if last {
                        return Ok(self.bytes);
                    }
                }
                Packet::Data { block_num, .. } => {
                    warn!(
                        "Received unexpected block {}, expected {}",
                        block_num, self.block_num
                    );
                    self.resend()?;
                }
                other => {
                    self.retransmit(&format!("unexpected {} during download", other))?;
                }
            }
        }
    }

    fn run_upload<R: Read>(&mut self, filename: &str, mut source: R) -> Result<u64, TransferError> {
        let mut reader = BlockReader::new(self.mode);
        self.request(Packet::Wrq {
            filename: filename.to_string(),
            mode: self.mode,
        })?;

        loop {
            let (packet, from) = self.receive()?;
            match packet {
                Packet::Ack(0) => {
                    self.lock_peer(from);
                    break;
                }
                other => self.retransmit(&format!("unexpected {} in reply to WRQ", other))?,
            }
        }
        self.set_state(State::Transmitting);

        loop {
            let data = match reader.next_block(&mut source) {
                Ok(data) => data,
                Err(e) => return Err(self.abort(e)),
            };
            let len = data.len();
            let block_num = self.block_num;
            self.send(Packet::Data { block_num, data })?;

            loop {
                match self.receive()?.0 {
                    Packet::Ack(ack) if ack == block_num => break,
                    Packet::Ack(ack) => {
                        warn!(
                            "Received ACK for block {} while waiting for {}, resending",
                            ack, block_num
                        );
                        self.resend()?;
                    }
                    other => {
                        self.retransmit(&format!("unexpected {} during upload", other))?
                    }
                }
            }

            self.bytes += len as u64;
            debug!("Block {} acknowledged ({} bytes)", block_num, len);

            if len < BLOCK_SIZE {
                return Ok(self.bytes);
            }
            self.block_num = self.block_num.wrapping_add(1);
        }
    }

    fn request(&mut self, packet: Packet) -> Result<(), TransferError> {
        debug!("Sending {} to {}", packet, self.server);
        self.send(packet)?;
        self.set_state(State::AwaitingFirstReply);
        Ok(())
    }

    /// Wait for the next usable packet from the server
    ///
    /// Timeouts and malformed datagrams retransmit the last packet; an ERROR
    /// packet ends the transfer.
    fn receive(&mut self) -> Result<(Packet, SocketAddr), TransferError> {
        loop {
            let (len, from) = match self.socket.recv_from(&mut self.buf) {
                Ok(received) => received,
                Err(e) if is_timeout(&e) => {
                    self.retransmit("timeout")?;
                    continue;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            let packet = Packet::deserialize(&self.buf[..len]);

            if let Some(peer) = self.peer {
                if from != peer {
                    self.reject_foreign(from, &packet);
                    continue;
                }
            }

            match packet {
                Ok(Packet::Error { code, msg }) => {
                    return Err(TransferError::Remote { code, message: msg });
                }
                Ok(packet) => return Ok((packet, from)),
                Err(e) => self.retransmit(&format!("{} from {}", e, from))?,
            }
        }
    }

    fn send(&mut self, packet: Packet) -> Result<(), TransferError> {
        self.last_sent = packet.serialize()?;
        self.retries = 0;
        self.resend()
    }

    fn resend(&mut self) -> Result<(), TransferError> {
        let to = self.destination();
        self.socket.send_to(&self.last_sent, &to)?;
        Ok(())
    }

    fn retransmit(&mut self, reason: &str) -> Result<(), TransferError> {
        if self.retries >= self.max_retries {
            warn!("Giving up after {} retransmissions ({})", self.retries, reason);
            return Err(TransferError::Timeout {
                retries: self.retries,
            });
        }
        self.retries += 1;
        warn!(
            "Retransmitting ({}/{}): {}",
            self.retries, self.max_retries, reason
        );
        self.resend()
    }

    fn reject_foreign(&self, from: SocketAddr, packet: &Result<Packet, PacketError>) {
        warn!("Ignoring datagram from unknown transfer ID {}", from);
        if matches!(packet, Ok(Packet::Error { .. })) {
            return;
        }
        if let Ok(bytes) = Packet::error(ErrorCode::UnknownTid, "").serialize() {
            if let Err(e) = self.socket.send_to(&bytes, &from) {
                debug!("Failed to notify {}: {}", from, e);
            }
        }
    }

    /// Tell the server a local failure ended the transfer
    fn abort(&mut self, err: TransferError) -> TransferError {
        let packet = match &err {
            TransferError::LocalIo(e) => Packet::error(ErrorCode::from_io(e), e.to_string()),
            TransferError::Encoding(e) => Packet::error(ErrorCode::Undefined, e.to_string()),
            _ => return err,
        };
        warn!("Aborting transfer: {}", err);
        if let Ok(bytes) = packet.serialize() {
            let to = self.destination();
            if let Err(e) = self.socket.send_to(&bytes, &to) {
                debug!("Failed to send {} to {}: {}", packet, to, e);
            }
        }
        err
    }

    fn lock_peer(&mut self, from: SocketAddr) {
        if from != self.server {
            info!("Server transfer ID is {}", from);
        }
        self.peer = Some(from);
    }

    fn destination(&self) -> SocketAddr {
        self.peer.unwrap_or(self.server)
    }

    fn set_state(&mut self, state: State) {
        debug!("Session state {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    fn finish(&mut self, result: Result<u64, TransferError>) -> Result<u64, TransferError> {
        match &result {
            Ok(bytes) => {
                self.set_state(State::Done);
                debug!("Transfer complete. Total bytes: {}", bytes);
            }
            Err(e) => {
                self.set_state(State::Failed);
                debug!("Transfer failed after {} bytes: {}", self.bytes, e);
            }
        }
        result
    }
}

fn write_block<W: Write>(sink: &mut W, data: &[u8], last: bool) -> io::Result<()> {
    sink.write_all(data)?;
    if last {
        sink.flush()?;
    }
    Ok(())
}

/// Slices a local source into wire-sized blocks
///
/// Netascii conversion can grow the data, so converted bytes are buffered and
/// handed out in exact `BLOCK_SIZE` pieces. Only the final block is shorter.
struct BlockReader {
    convert: Convert,
    pending: Vec<u8>,
    exhausted: bool,
}

impl BlockReader {
    fn new(mode: Mode) -> Self {
        Self {
            convert: Convert::new(mode),
            pending: Vec::with_capacity(BLOCK_SIZE * 2),
            exhausted: false,
        }
    }

    fn next_block<R: Read>(&mut self, source: &mut R) -> Result<Vec<u8>, TransferError> {
        let mut raw = [0u8; BLOCK_SIZE];
        while self.pending.len() < BLOCK_SIZE && !self.exhausted {
            let n = match source.read(&mut raw) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            if n == 0 {
                self.exhausted = true;
                let tail = self.convert.finish_to_wire();
                self.pending.extend(tail);
            } else {
                let wire = self.convert.to_wire(&raw[..n])?;
                self.pending.extend(wire);
            }
        }
        let take = self.pending.len().min(BLOCK_SIZE);
        Ok(self.pending.drain(..take).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    const SERVER: &str = "127.0.0.1:69";
    const TID: &str = "127.0.0.1:40000";

    type Reply = (Vec<u8>, SocketAddr);
    type Responder = Box<dyn FnMut(&Packet) -> Vec<Reply>>;

    /// In-memory server: every packet the client sends is answered by the
    /// responder; an empty inbox reads as a timeout.
    struct MockSocket {
        sent: RefCell<Vec<(Packet, SocketAddr)>>,
        inbox: RefCell<VecDeque<Reply>>,
        responder: RefCell<Responder>,
    }

    impl MockSocket {
        fn new(responder: impl FnMut(&Packet) -> Vec<Reply> + 'static) -> Self {
            Self {
                sent: RefCell::new(Vec::new()),
                inbox: RefCell::new(VecDeque::new()),
                responder: RefCell::new(Box::new(responder)),
            }
        }

        fn sent(&self) -> Vec<(Packet, SocketAddr)> {
            self.sent.borrow().clone()
        }

        fn sent_packets(&self) -> Vec<Packet> {
            self.sent().into_iter().map(|(p, _)| p).collect()
        }
    }

    impl Socket for MockSocket {
        fn send_to(&self, buf: &[u8], to: &SocketAddr) -> io::Result<()> {
            let packet = Packet::deserialize(buf).expect("client sent a malformed packet");
            self.sent.borrow_mut().push((packet.clone(), *to));
            let mut responder = self.responder.borrow_mut();
            let replies = (*responder)(&packet);
            self.inbox.borrow_mut().extend(replies);
            Ok(())
        }

        fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
            match self.inbox.borrow_mut().pop_front() {
                Some((bytes, from)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok((bytes.len(), from))
                }
                None => Err(io::ErrorKind::WouldBlock.into()),
            }
        }

        fn set_read_timeout(&self, _timeout: Duration) -> io::Result<()> {
            Ok(())
        }
    }

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    fn from_tid(packet: Packet) -> Reply {
        (packet.serialize().unwrap(), addr(TID))
    }

    fn data(block_num: u16, data: &[u8]) -> Packet {
        Packet::Data {
            block_num,
            data: data.to_vec(),
        }
    }

    fn session(socket: &MockSocket, mode: Mode) -> TransferSession<&MockSocket> {
        let options = TransferOptions {
            mode,
            timeout: Duration::from_millis(10),
            max_retries: 3,
        };
        TransferSession::new(socket, addr(SERVER), &options).unwrap()
    }

    /// Serves `content` in 512 byte blocks, resending the current block on
    /// anything but the matching ACK.
    fn serve_file(content: Vec<u8>) -> impl FnMut(&Packet) -> Vec<Reply> {
        let blocks: Vec<Vec<u8>> = {
            let mut blocks: Vec<Vec<u8>> =
                content.chunks(BLOCK_SIZE).map(|c| c.to_vec()).collect();
            if content.len() % BLOCK_SIZE == 0 {
                blocks.push(Vec::new());
            }
            blocks
        };
        let mut current = 0usize;
        move |packet| match packet {
            Packet::Rrq { .. } => {
                current = 1;
                vec![from_tid(data(1, &blocks[0]))]
            }
            Packet::Ack(n) if *n == current as u16 && current < blocks.len() => {
                current += 1;
                vec![from_tid(data(current as u16, &blocks[current - 1]))]
            }
            _ => Vec::new(),
        }
    }

    /// Accepts an upload, acknowledging every block
    fn accept_upload() -> impl FnMut(&Packet) -> Vec<Reply> {
        |packet| match packet {
            Packet::Wrq { .. } => vec![from_tid(Packet::Ack(0))],
            Packet::Data { block_num, .. } => vec![from_tid(Packet::Ack(*block_num))],
            _ => Vec::new(),
        }
    }

    #[test]
    fn download_1000_bytes() {
        let content: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let socket = MockSocket::new(serve_file(content.clone()));
        let mut sink = Vec::new();

        let bytes = session(&socket, Mode::Octet)
            .download("file.bin", &mut sink)
            .unwrap();

        assert_eq!(bytes, 1000);
        assert_eq!(sink, content);
        assert_eq!(
            socket.sent(),
            vec![
                (
                    Packet::Rrq {
                        filename: "file.bin".to_string(),
                        mode: Mode::Octet
                    },
                    addr(SERVER)
                ),
                (Packet::Ack(1), addr(TID)),
                (Packet::Ack(2), addr(TID)),
            ]
        );
    }

    #[test]
    fn short_block_ends_download() {
        let socket = MockSocket::new(serve_file(vec![1u8; 511]));
        let mut sink = Vec::new();
        let bytes = session(&socket, Mode::Octet)
            .download("f", &mut sink)
            .unwrap();
        assert_eq!(bytes, 511);
        assert_eq!(socket.sent_packets()[1..], [Packet::Ack(1)]);
    }

    #[test]
    fn full_block_needs_empty_terminator() {
        let socket = MockSocket::new(serve_file(vec![1u8; 512]));
        let mut sink = Vec::new();
        let bytes = session(&socket, Mode::Octet)
            .download("f", &mut sink)
            .unwrap();
        assert_eq!(bytes, 512);
        assert_eq!(sink.len(), 512);
        assert_eq!(socket.sent_packets()[1..], [Packet::Ack(1), Packet::Ack(2)]);
    }

    #[test]
    fn block_numbers_wrap_after_65535() {
        const TOTAL: usize = 65537;
        let mut current = 0usize;
        let socket = MockSocket::new(move |packet| {
            let next = match packet {
                Packet::Rrq { .. } => 1,
                Packet::Ack(n) if *n == current as u16 && current < TOTAL => current + 1,
                _ => return Vec::new(),
            };
            current = next;
            let len = if next == TOTAL { 10 } else { BLOCK_SIZE };
            vec![from_tid(data(next as u16, &vec![0u8; len]))]
        });

        let bytes = session(&socket, Mode::Octet)
            .download("big", io::sink())
            .unwrap();

        assert_eq!(bytes, ((TOTAL - 1) * BLOCK_SIZE + 10) as u64);
        let acks: Vec<u16> = socket
            .sent_packets()
            .into_iter()
            .filter_map(|p| match p {
                Packet::Ack(n) => Some(n),
                _ => None,
            })
            .collect();
        assert_eq!(acks.len(), TOTAL);
        assert_eq!(acks[65534..], [65535, 0, 1]);
    }

    #[test]
    fn duplicate_data_resends_previous_ack() {
        let mut acks = 0;
        let socket = MockSocket::new(move |packet| match packet {
            Packet::Rrq { .. } => vec![from_tid(data(1, &[1u8; BLOCK_SIZE]))],
            Packet::Ack(1) => {
                acks += 1;
                if acks == 1 {
                    // Delayed duplicate of block 1 arrives before block 2
                    vec![
                        from_tid(data(1, &[1u8; BLOCK_SIZE])),
                        from_tid(data(2, b"tail")),
                    ]
                } else {
                    Vec::new()
                }
            }
            _ => Vec::new(),
        });
        let mut sink = Vec::new();

        let bytes = session(&socket, Mode::Octet)
            .download("f", &mut sink)
            .unwrap();

        assert_eq!(bytes, BLOCK_SIZE as u64 + 4);
        assert_eq!(sink.len(), BLOCK_SIZE + 4);
        assert_eq!(
            socket.sent_packets()[1..],
            [Packet::Ack(1), Packet::Ack(1), Packet::Ack(2)]
        );
    }

    #[test]
    fn future_block_is_never_accepted() {
        let mut requests = 0;
        let socket = MockSocket::new(move |packet| match packet {
            Packet::Rrq { .. } => {
                requests += 1;
                if requests == 1 {
                    vec![from_tid(data(2, b"from the future"))]
                } else {
                    vec![from_tid(data(1, b"first"))]
                }
            }
            _ => Vec::new(),
        });
        let mut sink = Vec::new();

        session(&socket, Mode::Octet)
            .download("f", &mut sink)
            .unwrap();

        assert_eq!(sink, b"first");
        let sent = socket.sent_packets();
        assert!(matches!(sent[0], Packet::Rrq { .. }));
        assert!(matches!(sent[1], Packet::Rrq { .. }));
        assert_eq!(sent[2..], [Packet::Ack(1)]);
    }

    #[test]
    fn remote_error_fails_without_retry() {
        let socket = MockSocket::new(|packet| match packet {
            Packet::Rrq { .. } => vec![from_tid(Packet::error(ErrorCode::FileNotFound, ""))],
            _ => Vec::new(),
        });
        let mut sink = Vec::new();

        let err = session(&socket, Mode::Octet)
            .download("missing", &mut sink)
            .unwrap_err();

        match err {
            TransferError::Remote { code, message } => {
                assert_eq!(code, 1);
                assert_eq!(message, "File not found");
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(sink.is_empty());
        assert_eq!(socket.sent().len(), 1);
    }

    #[test]
    fn silent_server_times_out() {
        let socket = MockSocket::new(|_| Vec::new());
        let err = session(&socket, Mode::Octet)
            .download("f", io::sink())
            .unwrap_err();

        assert!(matches!(err, TransferError::Timeout { retries: 3 }));
        let sent = socket.sent();
        assert_eq!(sent.len(), 4);
        assert!(
            sent.iter()
                .all(|(p, to)| matches!(p, Packet::Rrq { .. }) && *to == addr(SERVER))
        );
    }

    #[test]
    fn malformed_reply_triggers_retransmission() {
        let mut requests = 0;
        let socket = MockSocket::new(move |packet| match packet {
            Packet::Rrq { .. } => {
                requests += 1;
                if requests == 1 {
                    vec![(vec![0, 3, 0], addr(TID))]
                } else {
                    vec![from_tid(data(1, b"ok"))]
                }
            }
            _ => Vec::new(),
        });

        let bytes = session(&socket, Mode::Octet)
            .download("f", io::sink())
            .unwrap();

        assert_eq!(bytes, 2);
        assert_eq!(socket.sent().len(), 3);
    }

    #[test]
    fn foreign_transfer_id_is_rejected() {
        let intruder = addr("127.0.0.1:50000");
        let socket = MockSocket::new(move |packet| match packet {
            Packet::Rrq { .. } => vec![from_tid(data(1, &[0u8; BLOCK_SIZE]))],
            Packet::Ack(1) => vec![
                (data(2, b"spoofed").serialize().unwrap(), intruder),
                from_tid(data(2, b"real")),
            ],
            _ => Vec::new(),
        });
        let mut sink = Vec::new();

        session(&socket, Mode::Octet)
            .download("f", &mut sink)
            .unwrap();

        assert_eq!(&sink[BLOCK_SIZE..], b"real");
        let sent = socket.sent();
        assert!(sent.contains(&(Packet::error(ErrorCode::UnknownTid, ""), intruder)));
        assert_eq!(sent.last().unwrap(), &(Packet::Ack(2), addr(TID)));
    }

    struct FullDisk;

    impl Write for FullDisk {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::ErrorKind::StorageFull.into())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn sink_failure_notifies_server() {
        let socket = MockSocket::new(serve_file(vec![9u8; 100]));
        let err = session(&socket, Mode::Octet)
            .download("f", FullDisk)
            .unwrap_err();

        assert!(matches!(err, TransferError::LocalIo(_)));
        let (packet, to) = socket.sent().pop().unwrap();
        assert_eq!(to, addr(TID));
        assert!(matches!(packet, Packet::Error { code: 3, .. }));
    }

    #[cfg(not(windows))]
    #[test]
    fn netascii_download_converts_line_endings() {
        let mut wire = vec![b'a'; BLOCK_SIZE - 1];
        wire.push(b'\r');
        let socket = MockSocket::new(move |packet| match packet {
            Packet::Rrq { .. } => vec![from_tid(data(1, &wire))],
            Packet::Ack(1) => vec![from_tid(data(2, b"\nend\r\n"))],
            _ => Vec::new(),
        });
        let mut sink = Vec::new();

        let bytes = session(&socket, Mode::NetAscii)
            .download("f.txt", &mut sink)
            .unwrap();

        assert_eq!(bytes, BLOCK_SIZE as u64 + 6);
        let mut expected = vec![b'a'; BLOCK_SIZE - 1];
        expected.extend_from_slice(b"\nend\n");
        assert_eq!(sink, expected);
    }

    #[test]
    fn netascii_encoding_error_aborts() {
        let socket = MockSocket::new(|packet| match packet {
            Packet::Rrq { .. } => vec![from_tid(data(1, &[0xff, 0xfe]))],
            _ => Vec::new(),
        });
        let err = session(&socket, Mode::NetAscii)
            .download("f.txt", io::sink())
            .unwrap_err();

        assert!(matches!(err, TransferError::Encoding(_)));
        assert!(matches!(
            socket.sent_packets().last(),
            Some(Packet::Error { code: 0, .. })
        ));
    }

    #[test]
    fn upload_empty_file_sends_one_empty_block() {
        let socket = MockSocket::new(accept_upload());
        let bytes = session(&socket, Mode::Octet)
            .upload("empty", io::empty())
            .unwrap();

        assert_eq!(bytes, 0);
        assert_eq!(
            socket.sent(),
            vec![
                (
                    Packet::Wrq {
                        filename: "empty".to_string(),
                        mode: Mode::Octet
                    },
                    addr(SERVER)
                ),
                (data(1, b""), addr(TID)),
            ]
        );
    }

    #[test]
    fn upload_multiple_of_block_size_ends_with_empty_block() {
        let socket = MockSocket::new(accept_upload());
        let content = vec![5u8; BLOCK_SIZE * 2];
        let bytes = session(&socket, Mode::Octet)
            .upload("f", content.as_slice())
            .unwrap();

        assert_eq!(bytes, (BLOCK_SIZE * 2) as u64);
        let sent = socket.sent_packets();
        assert_eq!(sent.len(), 4);
        assert_eq!(sent[3], data(3, b""));
    }

    /// Source that counts how many bytes were pulled from it
    struct CountingReader<'a> {
        inner: &'a [u8],
        read: std::rc::Rc<RefCell<usize>>,
    }

    impl Read for CountingReader<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.inner.read(buf)?;
            *self.read.borrow_mut() += n;
            Ok(n)
        }
    }

    #[test]
    fn stale_ack_resends_current_block() {
        let mut data_packets = 0;
        let socket = MockSocket::new(move |packet| match packet {
            Packet::Wrq { .. } => vec![from_tid(Packet::Ack(0))],
            Packet::Data { block_num, .. } => {
                data_packets += 1;
                if data_packets == 1 {
                    // Delayed duplicate of the WRQ acknowledgment
                    vec![from_tid(Packet::Ack(0))]
                } else {
                    vec![from_tid(Packet::Ack(*block_num))]
                }
            }
            _ => Vec::new(),
        });
        let content: Vec<u8> = (0..700u32).map(|i| i as u8).collect();
        let read = std::rc::Rc::new(RefCell::new(0));
        let source = CountingReader {
            inner: &content,
            read: read.clone(),
        };

        let bytes = session(&socket, Mode::Octet)
            .upload("f", source)
            .unwrap();

        assert_eq!(bytes, 700);
        assert_eq!(*read.borrow(), 700);
        let sent = socket.sent_packets();
        assert_eq!(sent.len(), 4);
        assert_eq!(sent[1], data(1, &content[..BLOCK_SIZE]));
        assert_eq!(sent[2], data(1, &content[..BLOCK_SIZE]));
        assert_eq!(sent[3], data(2, &content[BLOCK_SIZE..]));
    }

    #[test]
    fn upload_waits_for_ack_zero() {
        let mut requests = 0;
        let socket = MockSocket::new(move |packet| match packet {
            Packet::Wrq { .. } => {
                requests += 1;
                if requests == 1 {
                    vec![from_tid(Packet::Ack(7))]
                } else {
                    vec![from_tid(Packet::Ack(0))]
                }
            }
            Packet::Data { block_num, .. } => vec![from_tid(Packet::Ack(*block_num))],
            _ => Vec::new(),
        });

        session(&socket, Mode::Octet)
            .upload("f", &b"abc"[..])
            .unwrap();

        let sent = socket.sent_packets();
        assert!(matches!(sent[0], Packet::Wrq { .. }));
        assert!(matches!(sent[1], Packet::Wrq { .. }));
        assert_eq!(sent[2], data(1, b"abc"));
    }

    #[test]
    fn error_during_upload_is_fatal() {
        let socket = MockSocket::new(|packet| match packet {
            Packet::Wrq { .. } => vec![from_tid(Packet::Ack(0))],
            Packet::Data { .. } => vec![from_tid(Packet::error(ErrorCode::DiskFull, ""))],
            _ => Vec::new(),
        });
        let err = session(&socket, Mode::Octet)
            .upload("f", &[1u8; 2000][..])
            .unwrap_err();

        assert_eq!(err.remote_code(), Some(3));
        assert_eq!(socket.sent().len(), 2);
    }

    #[cfg(not(windows))]
    #[test]
    fn netascii_upload_blocks_are_full_on_the_wire() {
        let socket = MockSocket::new(accept_upload());
        let source = vec![b'\n'; 300];

        let bytes = session(&socket, Mode::NetAscii)
            .upload("f.txt", source.as_slice())
            .unwrap();

        assert_eq!(bytes, 600);
        let sent = socket.sent_packets();
        assert_eq!(sent.len(), 3);
        match (&sent[1], &sent[2]) {
            (Packet::Data { data: first, .. }, Packet::Data { data: second, .. }) => {
                assert_eq!(first.len(), BLOCK_SIZE);
                assert_eq!(second.len(), 600 - BLOCK_SIZE);
                assert!(first.chunks(2).all(|pair| pair == b"\r\n"));
            }
            other => panic!("unexpected packets {:?}", other),
        }
    }

    struct BrokenSource;

    impl Read for BrokenSource {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::ErrorKind::PermissionDenied.into())
        }
    }

    #[test]
    fn unreadable_source_notifies_server() {
        let socket = MockSocket::new(accept_upload());
        let err = session(&socket, Mode::Octet)
            .upload("f", BrokenSource)
            .unwrap_err();

        assert!(matches!(err, TransferError::LocalIo(_)));
        assert_eq!(
            socket.sent().pop().map(|(p, to)| (p.opcode(), to)),
            Some((5, addr(TID)))
        );
        assert!(matches!(
            socket.sent_packets().last(),
            Some(Packet::Error { code: 2, .. })
        ));
    }

    #[test]
    fn nul_in_filename_is_malformed_request() {
        let socket = MockSocket::new(|_| Vec::new());
        let err = session(&socket, Mode::Octet)
            .download("bad\0name", io::sink())
            .unwrap_err();
        assert!(matches!(err, TransferError::Malformed(_)));
        assert!(socket.sent().is_empty());
    }
}
