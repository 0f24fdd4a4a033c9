//! WearLink command model
//!
//! Typed get/set command variants for the WL01 protocol family, built on the
//! frame codec. Host-to-device requests are `Command`; device-to-host
//! messages are `DeviceMessage`. Every field domain is enforced at
//! construction and every payload length contract at parse time; nothing is
//! silently truncated or clamped.
//!
//! Payload layout is fixed per command: byte 0 is the operation byte,
//! multi-byte integers are little-endian. Replies echo the operation byte of
//! the request that triggered them.

use crate::error::CommandError;

/// Operation byte for read requests
pub const OP_GET: u8 = 0x01;

/// Operation byte for write requests
pub const OP_SET: u8 = 0x02;

/// Command ids of the WL01 family
pub mod command_id {
    pub const PING: u8 = 0x01;
    pub const TIME: u8 = 0x03;
    pub const ALARM: u8 = 0x05;
    pub const FIND_DEVICE: u8 = 0x11;
    pub const ACTIVITY_SLOTS: u8 = 0x21;
    pub const SLEEP_RECORDS: u8 = 0x23;
    pub const DAY_SUMMARY: u8 = 0x25;
}

/// Highest valid slot index in the 24h ring buffer (144 ten-minute slots)
pub const LAST_SLOT_INDEX: u8 = 143;

fn check_range(
    field: &'static str,
    value: u32,
    min: u32,
    max: u32,
) -> Result<(), CommandError> {
    if value < min || value > max {
        return Err(CommandError::FieldOutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

/// Wall-clock time as carried on the wire (set-time and time replies)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceTime {
    year: u16,
    month: u8,
    day: u8,
    hour: u8,
    minute: u8,
    second: u8,
}

impl DeviceTime {
    pub fn new(
        year: u16,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: u8,
    ) -> Result<Self, CommandError> {
        check_range("month", month.into(), 1, 12)?;
        check_range("day", day.into(), 1, 31)?;
        check_range("hour", hour.into(), 0, 23)?;
        check_range("minute", minute.into(), 0, 59)?;
        check_range("second", second.into(), 0, 59)?;
        Ok(Self {
            year,
            month,
            day,
            hour,
            minute,
            second,
        })
    }

    pub fn year(&self) -> u16 {
        self.year
    }

    pub fn month(&self) -> u8 {
        self.month
    }

    pub fn day(&self) -> u8 {
        self.day
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }

    pub fn second(&self) -> u8 {
        self.second
    }

    fn write_fields(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.year.to_le_bytes());
        out.push(self.month);
        out.push(self.day);
        out.push(self.hour);
        out.push(self.minute);
        out.push(self.second);
    }

    fn from_fields(b: &[u8]) -> Result<Self, CommandError> {
        Self::new(
            u16::from_le_bytes([b[0], b[1]]),
            b[2],
            b[3],
            b[4],
            b[5],
            b[6],
        )
    }
}

/// A single alarm slot on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmSetting {
    index: u8,
    enabled: bool,
    /// Bitmask of weekdays the alarm repeats on, bit 0 = Monday
    weekdays: u8,
    hour: u8,
    minute: u8,
}

impl AlarmSetting {
    pub fn new(
        index: u8,
        enabled: bool,
        weekdays: u8,
        hour: u8,
        minute: u8,
    ) -> Result<Self, CommandError> {
        check_range("alarm index", index.into(), 0, 7)?;
        check_range("weekday mask", weekdays.into(), 0, 0x7F)?;
        check_range("hour", hour.into(), 0, 23)?;
        check_range("minute", minute.into(), 0, 59)?;
        Ok(Self {
            index,
            enabled,
            weekdays,
            hour,
            minute,
        })
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn weekdays(&self) -> u8 {
        self.weekdays
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }

    fn write_fields(&self, out: &mut Vec<u8>) {
        out.push(self.index);
        out.push(self.enabled as u8);
        out.push(self.weekdays);
        out.push(self.hour);
        out.push(self.minute);
    }

    fn from_fields(b: &[u8]) -> Result<Self, CommandError> {
        Self::new(b[0], b[1] != 0, b[2], b[3], b[4])
    }
}

/// Slot range for a ring-buffer drain request, inclusive on both ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRange {
    from_hour: u8,
    from_minute: u8,
    to_hour: u8,
    to_minute: u8,
}

impl SlotRange {
    pub fn new(
        from_hour: u8,
        from_minute: u8,
        to_hour: u8,
        to_minute: u8,
    ) -> Result<Self, CommandError> {
        check_range("hour", from_hour.into(), 0, 23)?;
        check_range("minute", from_minute.into(), 0, 59)?;
        check_range("hour", to_hour.into(), 0, 23)?;
        check_range("minute", to_minute.into(), 0, 59)?;
        Ok(Self {
            from_hour,
            from_minute,
            to_hour,
            to_minute,
        })
    }

    pub fn from_hour(&self) -> u8 {
        self.from_hour
    }

    pub fn from_minute(&self) -> u8 {
        self.from_minute
    }

    pub fn to_hour(&self) -> u8 {
        self.to_hour
    }

    pub fn to_minute(&self) -> u8 {
        self.to_minute
    }
}

/// Host-to-device request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Keepalive; the device answers with a battery report
    Ping,
    GetTime,
    SetTime(DeviceTime),
    GetAlarm { index: u8 },
    SetAlarm(AlarmSetting),
    FindDevice { enable: bool },
    /// Request a range of ten-minute ring-buffer slots
    GetActivitySlots(SlotRange),
    GetSleepRecords,
    GetDaySummary,
}

impl Command {
    pub fn command_id(&self) -> u8 {
        match self {
            Command::Ping => command_id::PING,
            Command::GetTime | Command::SetTime(_) => command_id::TIME,
            Command::GetAlarm { .. } | Command::SetAlarm(_) => command_id::ALARM,
            Command::FindDevice { .. } => command_id::FIND_DEVICE,
            Command::GetActivitySlots(_) => command_id::ACTIVITY_SLOTS,
            Command::GetSleepRecords => command_id::SLEEP_RECORDS,
            Command::GetDaySummary => command_id::DAY_SUMMARY,
        }
    }

    /// Serialize to the frame payload: operation byte followed by the
    /// command's fields in fixed order.
    pub fn to_payload(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8);
        match self {
            Command::Ping
            | Command::GetTime
            | Command::GetSleepRecords
            | Command::GetDaySummary => out.push(OP_GET),
            Command::SetTime(time) => {
                out.push(OP_SET);
                time.write_fields(&mut out);
            },
            Command::GetAlarm { index } => {
                out.push(OP_GET);
                out.push(*index);
            },
            Command::SetAlarm(alarm) => {
                out.push(OP_SET);
                alarm.write_fields(&mut out);
            },
            Command::FindDevice { enable } => {
                out.push(OP_SET);
                out.push(*enable as u8);
            },
            Command::GetActivitySlots(range) => {
                out.push(OP_GET);
                out.push(range.from_hour);
                out.push(range.from_minute);
                out.push(range.to_hour);
                out.push(range.to_minute);
            },
        }
        out
    }
}

/// One ten-minute aggregate from the device ring buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotMessage {
    /// Slot index within the day, 0..=143
    pub slot: u8,
    pub steps: u16,
    pub heart_rate: u8,
    pub inactive_seconds: u16,
}

/// One sleep period; interval durations are minutes, consecutive from start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SleepMessage {
    pub start_timestamp: u32,
    pub fall_asleep_min: u16,
    pub light_min: u16,
    pub deep_min: u16,
    pub rem_min: u16,
    pub awake_min: u16,
}

/// Aggregates for one whole (past) day
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummaryMessage {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub steps: u32,
    pub distance_m: u32,
    pub calories: u32,
    pub min_heart_rate: u8,
    pub max_heart_rate: u8,
}

/// Device-to-host message, parsed from a validated frame
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceMessage {
    Battery { level: u8 },
    Time(DeviceTime),
    Alarm(AlarmSetting),
    Slot(SlotMessage),
    Sleep(SleepMessage),
    Summary(SummaryMessage),
}

impl DeviceMessage {
    /// Exact expected payload length (including the operation byte) per
    /// command id.
    fn expected_len(cmd: u8) -> Result<usize, CommandError> {
        match cmd {
            command_id::PING => Ok(2),
            command_id::TIME => Ok(8),
            command_id::ALARM => Ok(6),
            command_id::ACTIVITY_SLOTS => Ok(7),
            command_id::SLEEP_RECORDS => Ok(15),
            command_id::DAY_SUMMARY => Ok(19),
            other => Err(CommandError::UnexpectedCommandId(other)),
        }
    }

    /// Parse a device message from a frame's command id and payload.
    ///
    /// Validation order: command id, operation byte, exact payload length,
    /// then field domains. No variant is ever partially populated.
    pub fn parse(cmd: u8, payload: &[u8]) -> Result<DeviceMessage, CommandError> {
        let expected = Self::expected_len(cmd)?;

        let op = *payload
            .first()
            .ok_or(CommandError::UnexpectedPayloadLength {
                command_id: cmd,
                expected,
                actual: 0,
            })?;
        if op != OP_GET && op != OP_SET {
            return Err(CommandError::UnknownOperation(op));
        }

        if payload.len() != expected {
            return Err(CommandError::UnexpectedPayloadLength {
                command_id: cmd,
                expected,
                actual: payload.len(),
            });
        }

        let b = &payload[1..];
        match cmd {
            command_id::PING => Ok(DeviceMessage::Battery { level: b[0] }),
            command_id::TIME => Ok(DeviceMessage::Time(DeviceTime::from_fields(b)?)),
            command_id::ALARM => Ok(DeviceMessage::Alarm(AlarmSetting::from_fields(b)?)),
            command_id::ACTIVITY_SLOTS => {
                check_range("slot index", b[0].into(), 0, LAST_SLOT_INDEX.into())?;
                Ok(DeviceMessage::Slot(SlotMessage {
                    slot: b[0],
                    steps: u16::from_le_bytes([b[1], b[2]]),
                    heart_rate: b[3],
                    inactive_seconds: u16::from_le_bytes([b[4], b[5]]),
                }))
            },
            command_id::SLEEP_RECORDS => Ok(DeviceMessage::Sleep(SleepMessage {
                start_timestamp: u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
                fall_asleep_min: u16::from_le_bytes([b[4], b[5]]),
                light_min: u16::from_le_bytes([b[6], b[7]]),
                deep_min: u16::from_le_bytes([b[8], b[9]]),
                rem_min: u16::from_le_bytes([b[10], b[11]]),
                awake_min: u16::from_le_bytes([b[12], b[13]]),
            })),
            command_id::DAY_SUMMARY => {
                check_range("month", b[2].into(), 1, 12)?;
                check_range("day", b[3].into(), 1, 31)?;
                Ok(DeviceMessage::Summary(SummaryMessage {
                    year: u16::from_le_bytes([b[0], b[1]]),
                    month: b[2],
                    day: b[3],
                    steps: u32::from_le_bytes([b[4], b[5], b[6], b[7]]),
                    distance_m: u32::from_le_bytes([b[8], b[9], b[10], b[11]]),
                    calories: u32::from_le_bytes([b[12], b[13], b[14], b[15]]),
                    min_heart_rate: b[16],
                    max_heart_rate: b[17],
                }))
            },
            _ => unreachable!("expected_len rejects unknown ids"),
        }
    }
}
