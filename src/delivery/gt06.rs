//! GT06 binary uplink over a persistent TCP link

use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::link::{Dialer, Link};
use super::{ConnectionState, Delivery};
use crate::gt06::encoder::{encode_login_frame, encode_record_frame};
use crate::gt06::protocol::SerialNumber;
use crate::error::{Result, TrackerError};
use crate::location::LocationRecord;

/// Replies up to this size are not taken as a login acknowledgment
const MIN_LOGIN_REPLY: usize = 4;

const READ_BUFFER_SIZE: usize = 256;

/// GT06 session: login, then one frame per record
pub struct Gt06Uplink {
    dialer: Box<dyn Dialer>,
    host: String,
    port: u16,
    imei: String,
    link: Option<Box<dyn Link>>,
    state: ConnectionState,
    serial: SerialNumber,
    connect_timeout: Duration,
    ack_timeout: Duration,
}

impl Gt06Uplink {
    /// # Arguments
    ///
    /// * `dialer` - Opens the TCP link
    /// * `host`, `port` - Collector address
    /// * `imei` - Device identity sent in LOGIN
    /// * `connect_timeout` - Bound on dialing and on the login reply
    /// * `ack_timeout` - Bound on the wait for a per-record reply
    pub fn new(
        dialer: Box<dyn Dialer>,
        host: impl Into<String>,
        port: u16,
        imei: impl Into<String>,
        connect_timeout: Duration,
        ack_timeout: Duration,
    ) -> Self {
        Self {
            dialer,
            host: host.into(),
            port,
            imei: imei.into(),
            link: None,
            state: ConnectionState::Disconnected,
            serial: SerialNumber::default(),
            connect_timeout,
            ack_timeout,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Serial number the next frame will carry
    pub fn next_serial(&self) -> u16 {
        self.serial.current()
    }

    /// Dial and log in
    ///
    /// Any reply longer than four bytes counts as a successful login; the
    /// reply itself is not interpreted.
    pub async fn connect(&mut self) -> bool {
        self.link = None;
        self.state = ConnectionState::Connecting;
        info!("Connecting to GT06 server {}:{}", self.host, self.port);

        match self.login().await {
            Ok(link) => {
                self.link = Some(link);
                self.state = ConnectionState::LoggedIn;
                info!("Logged in to GT06 server");
                true
            }
            Err(reason) => {
                warn!("GT06 connect failed: {}", reason);
                self.state = ConnectionState::Disconnected;
                false
            }
        }
    }

    async fn login(&mut self) -> Result<Box<dyn Link>> {
        let mut link = timeout(self.connect_timeout, self.dialer.dial(&self.host, self.port))
            .await
            .map_err(|_| TrackerError::Timeout(self.connect_timeout))??;

        let frame = encode_login_frame(&self.imei, self.serial.current())?;
        link.write_all(&frame).await?;
        self.serial.advance();

        let mut buf = [0u8; READ_BUFFER_SIZE];
        let n = timeout(self.connect_timeout, link.read(&mut buf))
            .await
            .map_err(|_| TrackerError::Timeout(self.connect_timeout))??;
        if n <= MIN_LOGIN_REPLY {
            return Err(TrackerError::Uplink(format!("login reply too short ({} bytes)", n)));
        }

        debug!("Login reply: {} bytes", n);
        Ok(link)
    }

    /// Send one record, reconnecting first if needed
    ///
    /// After a successful write the reply wait is optimistic: a reply, a
    /// timeout, or the peer closing all count as delivered.
    pub async fn send(&mut self, record: &LocationRecord) -> Delivery {
        if self.link.is_none() || self.state != ConnectionState::LoggedIn {
            if !self.connect().await {
                return Delivery::Failed;
            }
        }

        let Some(link) = self.link.as_mut() else {
            return Delivery::Failed;
        };

        let serial = self.serial.current();
        let frame = encode_record_frame(record, serial);
        if let Err(e) = link.write_all(&frame).await {
            warn!("GT06 write failed: {}", e);
            self.disconnect();
            return Delivery::Failed;
        }
        self.serial.advance();
        debug!("Sent {} byte frame, serial {}", frame.len(), serial);

        let mut buf = [0u8; READ_BUFFER_SIZE];
        match timeout(self.ack_timeout, link.read(&mut buf)).await {
            Ok(Ok(0)) => {
                debug!("Server closed the link after serial {}", serial);
                self.disconnect();
                Delivery::Delivered
            }
            Ok(Ok(n)) => {
                debug!("Reply to serial {}: {} bytes", serial, n);
                Delivery::Delivered
            }
            Ok(Err(e)) => {
                warn!("GT06 read failed: {}", e);
                self.disconnect();
                Delivery::Failed
            }
            Err(_) => {
                debug!("No reply to serial {} within {:?}", serial, self.ack_timeout);
                Delivery::Delivered
            }
        }
    }

    /// Drop the link; the serial counter is kept
    pub fn disconnect(&mut self) {
        if self.link.take().is_some() {
            debug!("GT06 link closed");
        }
        self.state = ConnectionState::Disconnected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::link::mocks::{MockDialer, MockLink, Reply};
    use crate::gt06::decoder::decode_frame;
    use crate::gt06::protocol::{GT06_MSG_LOCATION, GT06_MSG_LOGIN, GT06_MSG_WIFI_LOCATION};
    use crate::location::{LocationSource, MacAddress, WifiObservation};
    use std::io::ErrorKind;

    const IMEI: &str = "868120145233604";

    fn record() -> LocationRecord {
        LocationRecord {
            timestamp: 1_710_506_096,
            latitude: 55.751244,
            longitude: 37.618423,
            altitude: 0.0,
            speed: 10.0,
            course: 45.0,
            satellites: 9,
            valid: true,
            source: LocationSource::Gps,
            accuracy: 0.0,
            battery_percent: 70,
            charging: false,
            access_points: Vec::new(),
        }
    }

    fn uplink(dialer: &MockDialer) -> Gt06Uplink {
        Gt06Uplink::new(
            Box::new(dialer.clone()),
            "collector.example.com",
            5023,
            IMEI,
            Duration::from_secs(10),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_connect_sends_login() {
        let dialer = MockDialer::new();
        let link = MockLink::acking();
        dialer.push_link(link.clone());

        let mut uplink = uplink(&dialer);
        assert!(uplink.connect().await);
        assert_eq!(uplink.state(), ConnectionState::LoggedIn);
        assert_eq!(uplink.next_serial(), 2);

        let written = link.get_written_data();
        assert_eq!(written, vec![encode_login_frame(IMEI, 1).unwrap()]);
        assert_eq!(dialer.dials.lock().unwrap()[0], ("collector.example.com".to_string(), 5023));
    }

    #[tokio::test]
    async fn test_short_login_reply_fails() {
        let dialer = MockDialer::new();
        let link = MockLink::new();
        link.push_reply(Reply::Data(vec![0x78, 0x78, 0x05, 0x01]));
        dialer.push_link(link);

        let mut uplink = uplink(&dialer);
        assert!(matches!(uplink.login().await, Err(TrackerError::Uplink(_))));
        assert!(!uplink.connect().await);
        assert_eq!(uplink.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_timeout_fails() {
        let dialer = MockDialer::new();
        dialer.push_link(MockLink::new());
        dialer.push_link(MockLink::new());

        let mut uplink = uplink(&dialer);
        match uplink.login().await {
            Err(TrackerError::Timeout(after)) => assert_eq!(after, Duration::from_secs(10)),
            Err(other) => panic!("unexpected {:?}", other),
            Ok(_) => panic!("login should time out"),
        }
        assert!(!uplink.connect().await);
        assert_eq!(uplink.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_dial_failure() {
        let dialer = MockDialer::new();
        dialer.push_error(ErrorKind::ConnectionRefused);

        let mut uplink = uplink(&dialer);
        assert!(!uplink.connect().await);
        assert_eq!(uplink.send(&record()).await, Delivery::Failed);
        assert_eq!(dialer.dial_count(), 2);
    }

    #[tokio::test]
    async fn test_send_connects_and_frames_record() {
        let dialer = MockDialer::new();
        let link = MockLink::acking();
        dialer.push_link(link.clone());

        let mut uplink = uplink(&dialer);
        assert_eq!(uplink.send(&record()).await, Delivery::Delivered);
        assert_eq!(uplink.send(&record()).await, Delivery::Delivered);

        let written = link.get_written_data();
        assert_eq!(written.len(), 3);
        assert_eq!(decode_frame(&written[0]).unwrap().message_type, GT06_MSG_LOGIN);

        let first = decode_frame(&written[1]).unwrap();
        let second = decode_frame(&written[2]).unwrap();
        assert_eq!(first.message_type, GT06_MSG_LOCATION);
        assert_eq!((first.serial, second.serial), (2, 3));
        assert_eq!(dialer.dial_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_timeout_counts_as_delivered() {
        let dialer = MockDialer::new();
        let link = MockLink::new();
        link.push_reply(Reply::Data(vec![0u8; 10]));
        // No reply for the record
        dialer.push_link(link);

        let mut uplink = uplink(&dialer);
        assert_eq!(uplink.send(&record()).await, Delivery::Delivered);
        assert_eq!(uplink.state(), ConnectionState::LoggedIn);
    }

    #[tokio::test]
    async fn test_eof_delivers_and_reconnects_next_time() {
        let dialer = MockDialer::new();
        let first = MockLink::new();
        first.push_reply(Reply::Data(vec![0u8; 10]));
        first.push_reply(Reply::Eof);
        let second = MockLink::acking();
        dialer.push_link(first);
        dialer.push_link(second.clone());

        let mut uplink = uplink(&dialer);
        assert_eq!(uplink.send(&record()).await, Delivery::Delivered);
        assert_eq!(uplink.state(), ConnectionState::Disconnected);

        assert_eq!(uplink.send(&record()).await, Delivery::Delivered);
        assert_eq!(dialer.dial_count(), 2);

        // Serial keeps counting across the reconnect: login 1, record 2, login 3, record 4
        let written = second.get_written_data();
        assert_eq!(decode_frame(&written[0]).unwrap().serial, 3);
        assert_eq!(decode_frame(&written[1]).unwrap().serial, 4);
    }

    #[tokio::test]
    async fn test_read_error_fails_and_disconnects() {
        let dialer = MockDialer::new();
        let link = MockLink::new();
        link.push_reply(Reply::Data(vec![0u8; 10]));
        link.push_reply(Reply::Error(ErrorKind::ConnectionReset));
        dialer.push_link(link);

        let mut uplink = uplink(&dialer);
        assert_eq!(uplink.send(&record()).await, Delivery::Failed);
        assert_eq!(uplink.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_write_error_fails_without_advancing_serial() {
        let dialer = MockDialer::new();
        let link = MockLink::acking();
        dialer.push_link(link.clone());

        let mut uplink = uplink(&dialer);
        assert!(uplink.connect().await);
        link.set_write_error(ErrorKind::BrokenPipe);

        assert_eq!(uplink.send(&record()).await, Delivery::Failed);
        assert_eq!(uplink.state(), ConnectionState::Disconnected);
        assert_eq!(uplink.next_serial(), 2);
    }

    #[tokio::test]
    async fn test_unresolved_wifi_goes_out_as_wifi_location() {
        let dialer = MockDialer::new();
        let link = MockLink::acking();
        dialer.push_link(link.clone());

        let mut wifi = record();
        wifi.valid = false;
        wifi.source = LocationSource::Wifi;
        wifi.access_points = vec![WifiObservation { mac: MacAddress([7; 6]), signal: -66 }];

        let mut uplink = uplink(&dialer);
        assert_eq!(uplink.send(&wifi).await, Delivery::Delivered);

        let written = link.get_written_data();
        assert_eq!(decode_frame(&written[1]).unwrap().message_type, GT06_MSG_WIFI_LOCATION);
    }

    #[tokio::test]
    async fn test_disconnect_keeps_serial() {
        let dialer = MockDialer::new();
        dialer.push_link(MockLink::acking());

        let mut uplink = uplink(&dialer);
        uplink.connect().await;
        uplink.disconnect();

        assert_eq!(uplink.state(), ConnectionState::Disconnected);
        assert_eq!(uplink.next_serial(), 2);
    }
}
