//! Auxiliary request/response client.
//!
//! Generic RCSP operations riding FE command frames on the data channel,
//! plus the two 9E reads on the control channel. These share the connection
//! with the upload session but use their own serial counter.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use tracing::{debug, warn};

use crate::bus::NotificationBus;
use crate::connection::{QixSeq, RcspSeq};
use crate::error::{CoreError, WaitPoint};
use crate::protocol::constants::{
    ACK_TIMEOUT, CMD_FILE_BROWSE_START, CMD_FILE_BROWSE_STOP, CMD_GET_FEATURE_MAP,
    CMD_GET_SYS_INFO, CMD_GET_TARGET_INFO, CMD_SMALL_FILE, QIX_CMD_REQ_DATA,
    QIX_CMD_REQ_SCREEN_INFO, QIX_CMD_RET_BATTERY, QIX_CMD_RET_SCREEN_INFO, QIX_FLAG_GET,
    QIX_REPLY_TIMEOUT,
};
use crate::protocol::{Frame, FrameError, FrameFlag, QixFrame};
use crate::transport::{BadgeTransport, Endpoint};

/// Conventional attribute types returned by the info queries.
pub mod attr {
    pub const PROTOCOL_VERSION: u8 = 0x00;
    pub const SYS_INFO: u8 = 0x01;
    pub const DEVICE_NAME: u8 = 0x02;
    pub const DEVICE_VERSION: u8 = 0x03;
    pub const BATTERY: u8 = 0x05;
}

/// Small-file record types.
pub mod small_file_type {
    pub const CONTACT: u8 = 0x01;
    pub const CALL_LOG: u8 = 0x02;
    pub const NOTE: u8 = 0x03;
    pub const WEATHER: u8 = 0x04;
    pub const STEP: u8 = 0x05;
    pub const ALARM: u8 = 0x06;
}

/// Small-file operations carried by `cmd 0x28`.
#[derive(Debug, Clone, Copy)]
enum SmallFileOp {
    Query = 0x00,
    Read = 0x01,
    Delete = 0x04,
}

/// One TLV attribute from an info response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attr {
    pub ty: u8,
    pub value: Vec<u8>,
}

/// One directory entry from a file browse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub ty: u8,
    pub data: Vec<u8>,
}

/// Battery read result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryStatus {
    pub status: u8,
    /// Charge level in percent.
    pub level: u8,
}

/// Display properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenInfo {
    pub width: u16,
    pub height: u16,
    pub pic_width: u16,
    pub pic_height: u16,
    /// Available picture memory in bytes.
    pub memory: u32,
}

pub struct RcspClient<'a, T: BadgeTransport> {
    transport: &'a T,
    bus: &'a NotificationBus,
    rcsp_seq: &'a RcspSeq,
    qix_seq: &'a QixSeq,
}

impl<'a, T: BadgeTransport> RcspClient<'a, T> {
    pub(crate) fn new(
        transport: &'a T,
        bus: &'a NotificationBus,
        rcsp_seq: &'a RcspSeq,
        qix_seq: &'a QixSeq,
    ) -> Self {
        Self {
            transport,
            bus,
            rcsp_seq,
            qix_seq,
        }
    }

    /// 32-bit feature mask of the target.
    pub fn feature_map(&self) -> Result<u32, CoreError> {
        let data = self.request(CMD_GET_FEATURE_MAP, &[])?;
        if data.len() < 4 {
            return Err(CoreError::Protocol(FrameError::TooShort {
                actual: data.len(),
            }));
        }
        Ok(BigEndian::read_u32(&data[..4]))
    }

    /// Target attribute list for the masked attribute set.
    pub fn target_info(&self, mask: u32, platform: u8) -> Result<Vec<Attr>, CoreError> {
        let mut params = [0u8; 5];
        BigEndian::write_u32(&mut params[..4], mask);
        params[4] = platform;
        let data = self.request(CMD_GET_TARGET_INFO, &params)?;
        Ok(parse_attrs(&data))
    }

    /// System attribute list for one function.
    pub fn sys_info(&self, function: u8, mask: u32) -> Result<Vec<Attr>, CoreError> {
        let mut params = [0u8; 5];
        params[0] = function;
        BigEndian::write_u32(&mut params[1..], mask);
        let data = self.request(CMD_GET_SYS_INFO, &params)?;
        Ok(parse_attrs(&data))
    }

    /// Start browsing a device directory.
    pub fn start_file_browse(
        &self,
        browse_type: u8,
        read_num: u8,
        start_index: u16,
        dev_handler: u32,
        path: &[u8],
    ) -> Result<Vec<DirEntry>, CoreError> {
        let mut params = Vec::with_capacity(10 + path.len());
        params.push(browse_type);
        params.push(read_num);
        params.extend_from_slice(&start_index.to_be_bytes());
        params.extend_from_slice(&dev_handler.to_be_bytes());
        let mut path_len = [0u8; 2];
        LittleEndian::write_u16(&mut path_len, path.len() as u16);
        params.extend_from_slice(&path_len);
        params.extend_from_slice(path);

        let data = self.request(CMD_FILE_BROWSE_START, &params)?;
        Ok(parse_attrs(&data)
            .into_iter()
            .map(|a| DirEntry {
                ty: a.ty,
                data: a.value,
            })
            .collect())
    }

    pub fn stop_file_browse(&self) -> Result<(), CoreError> {
        self.request(CMD_FILE_BROWSE_STOP, &[])?;
        Ok(())
    }

    /// Query the small-file store for records of one type.
    pub fn small_file_query(&self, ty: u8) -> Result<Vec<u8>, CoreError> {
        self.request(CMD_SMALL_FILE, &[SmallFileOp::Query as u8, ty])
    }

    /// Read one small-file record.
    pub fn small_file_read(&self, ty: u8, id: u16) -> Result<Vec<u8>, CoreError> {
        let mut params = [SmallFileOp::Read as u8, ty, 0, 0];
        BigEndian::write_u16(&mut params[2..], id);
        self.request(CMD_SMALL_FILE, &params)
    }

    /// Delete one small-file record.
    pub fn small_file_delete(&self, ty: u8, id: u16) -> Result<(), CoreError> {
        let mut params = [SmallFileOp::Delete as u8, ty, 0, 0];
        BigEndian::write_u16(&mut params[2..], id);
        self.request(CMD_SMALL_FILE, &params)?;
        Ok(())
    }

    /// Battery status via the control channel.
    pub fn battery(&self) -> Result<BatteryStatus, CoreError> {
        let reply = self.qix_request(QIX_CMD_REQ_DATA, vec![0x80], QIX_CMD_RET_BATTERY)?;
        if reply.payload.len() < 2 {
            return Err(CoreError::Protocol(FrameError::TooShort {
                actual: reply.payload.len(),
            }));
        }
        Ok(BatteryStatus {
            status: reply.payload[0],
            level: reply.payload[1],
        })
    }

    /// Display properties via the control channel.
    pub fn screen_info(&self) -> Result<ScreenInfo, CoreError> {
        let reply =
            self.qix_request(QIX_CMD_REQ_SCREEN_INFO, vec![0x01], QIX_CMD_RET_SCREEN_INFO)?;
        let p = &reply.payload;
        if p.len() < 13 {
            return Err(CoreError::Protocol(FrameError::TooShort { actual: p.len() }));
        }
        Ok(ScreenInfo {
            width: LittleEndian::read_u16(&p[1..3]),
            height: LittleEndian::read_u16(&p[3..5]),
            pic_width: LittleEndian::read_u16(&p[5..7]),
            pic_height: LittleEndian::read_u16(&p[7..9]),
            memory: LittleEndian::read_u32(&p[9..13]),
        })
    }

    /// One FE request/response exchange. The reply must echo the serial;
    /// its status byte must be zero. Returns the data after `[status, seq]`.
    fn request(&self, cmd: u8, params: &[u8]) -> Result<Vec<u8>, CoreError> {
        let seq = self.rcsp_seq.next();
        let mut body = Vec::with_capacity(1 + params.len());
        body.push(seq);
        body.extend_from_slice(params);
        let frame = Frame::command(cmd, body);
        self.transport.write(Endpoint::DataWrite, &frame.encode())?;

        let reply = self
            .bus
            .wait_frame(ACK_TIMEOUT, WaitPoint::Ack(cmd), |frame| {
                frame.flag == FrameFlag::Response
                    && frame.cmd == cmd
                    && frame.body.get(1) == Some(&seq)
            })?;
        let status = reply.body.first().copied().unwrap_or(0xFF);
        if status != 0 {
            return Err(CoreError::DeviceStatus {
                phase: "rcsp request",
                status,
            });
        }
        debug!(cmd = format!("0x{cmd:02X}"), len = reply.body.len(), "RCSP reply");
        Ok(reply.body[2..].to_vec())
    }

    /// One 9E request/response exchange, matched by reply command.
    fn qix_request(
        &self,
        cmd: u8,
        payload: Vec<u8>,
        reply_cmd: u8,
    ) -> Result<QixFrame, CoreError> {
        let serial = self.qix_seq.next();
        let flag = QIX_FLAG_GET | (serial << 4);
        let frame = QixFrame::new(cmd, payload, flag);
        self.transport.write(Endpoint::CtrlWrite, &frame.encode())?;

        let inbound = self.bus.wait_raw(
            QIX_REPLY_TIMEOUT,
            WaitPoint::QixReply(reply_cmd),
            |item| {
                item.endpoint == Endpoint::CtrlNotify
                    && QixFrame::decode(&item.payload).is_ok_and(|q| q.cmd == reply_cmd)
            },
        )?;
        Ok(QixFrame::decode(&inbound.payload).expect("matched payload decodes"))
    }
}

/// Parse a TLV attribute list: `len(1) | type(1) | value[len-1]`, repeated.
fn parse_attrs(data: &[u8]) -> Vec<Attr> {
    let mut attrs = Vec::new();
    let mut i = 0;
    while i + 2 <= data.len() {
        let len = data[i] as usize;
        if len == 0 || i + 1 + len > data.len() {
            warn!(offset = i, "Truncated attribute list");
            break;
        }
        attrs.push(Attr {
            ty: data[i + 1],
            value: data[i + 2..i + 1 + len].to_vec(),
        });
        i += 1 + len;
    }
    attrs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use std::sync::Arc;

    struct Fixture {
        mock: Arc<MockTransport>,
        bus: NotificationBus,
        rcsp_seq: RcspSeq,
        qix_seq: QixSeq,
    }

    impl Fixture {
        fn new() -> Self {
            let mock = Arc::new(MockTransport::new());
            let bus = NotificationBus::new(Box::new(|_| {}));
            mock.subscribe(bus.sink()).unwrap();
            Self {
                mock,
                bus,
                rcsp_seq: RcspSeq::new(),
                qix_seq: QixSeq::new(),
            }
        }

        fn client(&self) -> RcspClient<'_, MockTransport> {
            RcspClient::new(&*self.mock, &self.bus, &self.rcsp_seq, &self.qix_seq)
        }
    }

    /// Echo the request serial back in a response with the given data.
    fn respond_with(mock: &Arc<MockTransport>, cmd: u8, status: u8, data: Vec<u8>) {
        mock.add_responder(Box::new(move |endpoint, bytes: &[u8]| {
            if endpoint != Endpoint::DataWrite {
                return Vec::new();
            }
            let Ok(frame) = Frame::decode(bytes) else {
                return Vec::new();
            };
            if frame.cmd != cmd || frame.flag != FrameFlag::Command {
                return Vec::new();
            }
            let mut body = vec![status, frame.body[0]];
            body.extend_from_slice(&data);
            vec![(Endpoint::DataNotify, Frame::response(cmd, body).encode())]
        }));
    }

    #[test]
    fn test_feature_map() {
        let fx = Fixture::new();
        respond_with(&fx.mock, CMD_GET_FEATURE_MAP, 0, vec![0x00, 0x01, 0x02, 0x03]);
        assert_eq!(fx.client().feature_map().unwrap(), 0x00010203);

        // The request carried serial 1 and no parameters.
        let writes = fx.mock.writes_on(Endpoint::DataWrite);
        let request = Frame::decode(&writes[0]).unwrap();
        assert_eq!(request.body, vec![0x01]);
    }

    #[test]
    fn test_request_serials_increment() {
        let fx = Fixture::new();
        respond_with(&fx.mock, CMD_GET_FEATURE_MAP, 0, vec![0; 4]);
        let client = fx.client();
        client.feature_map().unwrap();
        client.feature_map().unwrap();

        let writes = fx.mock.writes_on(Endpoint::DataWrite);
        assert_eq!(Frame::decode(&writes[0]).unwrap().body[0], 1);
        assert_eq!(Frame::decode(&writes[1]).unwrap().body[0], 2);
    }

    #[test]
    fn test_nonzero_status_is_an_error() {
        let fx = Fixture::new();
        respond_with(&fx.mock, CMD_GET_SYS_INFO, 0x03, vec![]);
        let err = fx.client().sys_info(0x01, 0xFFFF_FFFF).unwrap_err();
        assert!(matches!(
            err,
            CoreError::DeviceStatus {
                phase: "rcsp request",
                status: 0x03
            }
        ));
    }

    #[test]
    fn test_target_info_parses_attrs() {
        let fx = Fixture::new();
        // Two attributes: name "BADGE" and a 1-byte battery level.
        let mut tlv = vec![6, attr::DEVICE_NAME];
        tlv.extend_from_slice(b"BADGE");
        tlv.extend_from_slice(&[2, attr::BATTERY, 0x55]);
        respond_with(&fx.mock, CMD_GET_TARGET_INFO, 0, tlv);

        let attrs = fx.client().target_info(0xFFFF_FFFF, 0x01).unwrap();
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs[0].ty, attr::DEVICE_NAME);
        assert_eq!(attrs[0].value, b"BADGE");
        assert_eq!(attrs[1].value, vec![0x55]);

        // Request parameters: mask BE32 then platform.
        let writes = fx.mock.writes_on(Endpoint::DataWrite);
        let request = Frame::decode(&writes[0]).unwrap();
        assert_eq!(&request.body[1..], &[0xFF, 0xFF, 0xFF, 0xFF, 0x01]);
    }

    #[test]
    fn test_parse_attrs_stops_on_truncation() {
        let attrs = parse_attrs(&[2, 0x01, 0xAA, 9, 0x02, 0x01]);
        assert_eq!(attrs.len(), 1);
        assert_eq!(attrs[0].value, vec![0xAA]);
    }

    #[test]
    fn test_small_file_read_params() {
        let fx = Fixture::new();
        respond_with(&fx.mock, CMD_SMALL_FILE, 0, vec![0xDE, 0xAD]);
        let data = fx
            .client()
            .small_file_read(small_file_type::WEATHER, 0x0102)
            .unwrap();
        assert_eq!(data, vec![0xDE, 0xAD]);

        let writes = fx.mock.writes_on(Endpoint::DataWrite);
        let request = Frame::decode(&writes[0]).unwrap();
        assert_eq!(&request.body[1..], &[0x01, small_file_type::WEATHER, 0x01, 0x02]);
    }

    #[test]
    fn test_battery_read() {
        let fx = Fixture::new();
        fx.mock.add_responder(Box::new(|endpoint, bytes: &[u8]| {
            if endpoint == Endpoint::CtrlWrite
                && QixFrame::decode(bytes).is_ok_and(|q| q.cmd == QIX_CMD_REQ_DATA)
            {
                vec![(
                    Endpoint::CtrlNotify,
                    QixFrame::new(QIX_CMD_RET_BATTERY, vec![0x00, 0x64], QIX_FLAG_GET).encode(),
                )]
            } else {
                Vec::new()
            }
        }));
        let battery = fx.client().battery().unwrap();
        assert_eq!(battery.status, 0);
        assert_eq!(battery.level, 100);
    }

    #[test]
    fn test_screen_info_read() {
        let fx = Fixture::new();
        fx.mock.add_responder(Box::new(|endpoint, bytes: &[u8]| {
            if endpoint == Endpoint::CtrlWrite
                && QixFrame::decode(bytes).is_ok_and(|q| q.cmd == QIX_CMD_REQ_SCREEN_INFO)
            {
                let mut payload = vec![0x01];
                payload.extend_from_slice(&368u16.to_le_bytes());
                payload.extend_from_slice(&368u16.to_le_bytes());
                payload.extend_from_slice(&368u16.to_le_bytes());
                payload.extend_from_slice(&368u16.to_le_bytes());
                payload.extend_from_slice(&2_097_152u32.to_le_bytes());
                vec![(
                    Endpoint::CtrlNotify,
                    QixFrame::new(QIX_CMD_RET_SCREEN_INFO, payload, QIX_FLAG_GET).encode(),
                )]
            } else {
                Vec::new()
            }
        }));
        let info = fx.client().screen_info().unwrap();
        assert_eq!(info.width, 368);
        assert_eq!(info.pic_height, 368);
        assert_eq!(info.memory, 2_097_152);
    }
}
