//! Codec for the weekly schedule blobs stored in the time program registers.
//!
//! A schedule covers one week in 15-minute slots. On the wire it is a string
//! of 168 hexadecimal digits, 24 per day, with the days laid out in the
//! firmware's internal order rather than calendar order. Within a day the
//! digits run backwards (the last digit covers 00:00..01:00) and each digit
//! holds four slots.
//!
//! Decoding reads slot bits least-significant-first while encoding writes
//! them most-significant-first, exactly as the SMT gateway does. The two
//! directions therefore do not invert each other for schedules that change
//! state in the middle of an hour; keep hour-aligned schedules when the
//! round trip matters.

use strum::IntoEnumIterator;

pub const SLOTS_PER_DAY: usize = 96;
pub const CHARS_PER_DAY: usize = 24;
pub const BLOB_LENGTH: usize = 7 * CHARS_PER_DAY;

/// Firmware order of the per-day sections inside a blob.
pub const WIRE_DAY_ORDER: [Weekday; 7] = [
    Weekday::Sat,
    Weekday::Fri,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Mon,
    Weekday::Sun,
];

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[derive(serde::Serialize, serde::Deserialize, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Weekday {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

/// A maximal run of active slots within one day.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TimeSlot {
    /// First active time, `HH:MM` on a 15-minute grid.
    pub start: String,
    /// First inactive time; `00:00` means the run extends to the end of the
    /// day.
    pub stop: String,
    #[serde(default)]
    pub on: bool,
}

impl TimeSlot {
    pub fn new(start: &str, stop: &str) -> Self {
        Self { start: start.into(), stop: stop.into(), on: true }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DaySchedule {
    #[serde(default)]
    pub timeslots: Vec<TimeSlot>,
}

/// One week of schedule data, in calendar order for human consumption.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TimeProgram {
    #[serde(default)]
    pub mon: DaySchedule,
    #[serde(default)]
    pub tue: DaySchedule,
    #[serde(default)]
    pub wed: DaySchedule,
    #[serde(default)]
    pub thu: DaySchedule,
    #[serde(default)]
    pub fri: DaySchedule,
    #[serde(default)]
    pub sat: DaySchedule,
    #[serde(default)]
    pub sun: DaySchedule,
}

impl TimeProgram {
    pub fn day(&self, weekday: Weekday) -> &DaySchedule {
        match weekday {
            Weekday::Mon => &self.mon,
            Weekday::Tue => &self.tue,
            Weekday::Wed => &self.wed,
            Weekday::Thu => &self.thu,
            Weekday::Fri => &self.fri,
            Weekday::Sat => &self.sat,
            Weekday::Sun => &self.sun,
        }
    }

    pub fn day_mut(&mut self, weekday: Weekday) -> &mut DaySchedule {
        match weekday {
            Weekday::Mon => &mut self.mon,
            Weekday::Tue => &mut self.tue,
            Weekday::Wed => &mut self.wed,
            Weekday::Thu => &mut self.thu,
            Weekday::Fri => &mut self.fri,
            Weekday::Sat => &mut self.sat,
            Weekday::Sun => &mut self.sun,
        }
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("the schedule blob is {length} characters long, expected {BLOB_LENGTH}")]
    BadLength { length: usize },
    #[error("the schedule blob contains {character:?} at offset {position}")]
    BadHexDigit { character: char, position: usize },
}

/// Parses a wire blob into per-day runs of active slots.
pub fn decode(blob: &str) -> Result<TimeProgram, DecodeError> {
    let bytes = blob.as_bytes();
    if bytes.len() != BLOB_LENGTH {
        return Err(DecodeError::BadLength { length: bytes.len() });
    }
    let mut program = TimeProgram::default();
    for (day_index, weekday) in WIRE_DAY_ORDER.into_iter().enumerate() {
        let day_hex = &bytes[day_index * CHARS_PER_DAY..][..CHARS_PER_DAY];
        let mut nibbles = [0u8; CHARS_PER_DAY];
        for (position, character) in day_hex.iter().enumerate() {
            nibbles[position] = (*character as char)
                .to_digit(16)
                .ok_or(DecodeError::BadHexDigit {
                    character: *character as char,
                    position: day_index * CHARS_PER_DAY + position,
                })? as u8;
        }
        let mut active = [false; SLOTS_PER_DAY];
        for (slot, state) in active.iter_mut().enumerate() {
            // Days are stored back to front and slots fill each digit from
            // the least significant bit up.
            *state = nibbles[CHARS_PER_DAY - 1 - slot / 4] >> (slot % 4) & 1 != 0;
        }
        program.day_mut(weekday).timeslots = maximal_runs(&active);
    }
    Ok(program)
}

/// Renders a schedule back into a wire blob.
///
/// Runs with `on` unset contribute nothing and a `stop` of `00:00` extends
/// to the end of the day. Unparseable times are treated as `00:00`.
pub fn encode(program: &TimeProgram) -> String {
    let mut blob = String::with_capacity(BLOB_LENGTH);
    for weekday in WIRE_DAY_ORDER {
        let mut active = [false; SLOTS_PER_DAY];
        for timeslot in &program.day(weekday).timeslots {
            if !timeslot.on {
                continue;
            }
            let start = time_to_slot(&timeslot.start);
            let mut stop = time_to_slot(&timeslot.stop);
            if stop == 0 {
                stop = SLOTS_PER_DAY;
            }
            for state in active.iter_mut().take(stop).skip(start) {
                *state = true;
            }
        }
        for character in 0..CHARS_PER_DAY {
            let base = 4 * (CHARS_PER_DAY - 1 - character);
            let mut nibble = 0u8;
            for offset in 0..4 {
                if active[base + offset] {
                    // Written most-significant-first, unlike the decode
                    // direction.
                    nibble |= 1 << (3 - offset);
                }
            }
            blob.push(HEX_DIGITS[usize::from(nibble)] as char);
        }
    }
    blob
}

/// Summarises a program as `day: start-stop, ...` for single-line output.
pub fn summarize(program: &TimeProgram) -> String {
    let mut days = Vec::new();
    for weekday in Weekday::iter() {
        let timeslots = &program.day(weekday).timeslots;
        if timeslots.is_empty() {
            continue;
        }
        let runs = timeslots
            .iter()
            .map(|slot| format!("{}-{}", slot.start, slot.stop))
            .collect::<Vec<_>>()
            .join(", ");
        days.push(format!("{weekday}: {runs}"));
    }
    days.join("; ")
}

fn maximal_runs(active: &[bool; SLOTS_PER_DAY]) -> Vec<TimeSlot> {
    let mut timeslots = Vec::new();
    let mut run_start = None;
    for (slot, state) in active.iter().enumerate() {
        match (*state, run_start) {
            (true, None) => run_start = Some(slot),
            (false, Some(start)) => {
                timeslots.push(TimeSlot::new(&slot_to_time(start), &slot_to_time(slot)));
                run_start = None;
            }
            _ => {}
        }
    }
    if let Some(start) = run_start {
        timeslots.push(TimeSlot::new(
            &slot_to_time(start),
            &slot_to_time(SLOTS_PER_DAY),
        ));
    }
    timeslots
}

fn slot_to_time(slot: usize) -> String {
    let mut hours = slot / 4;
    let minutes = (slot % 4) * 15;
    if hours >= 24 {
        hours = 0;
    }
    format!("{hours:02}:{minutes:02}")
}

fn time_to_slot(time: &str) -> usize {
    let Some((hours, minutes)) = time.split_once(':') else {
        return 0;
    };
    let (Ok(hours), Ok(minutes)) = (hours.parse::<usize>(), minutes.parse::<usize>()) else {
        return 0;
    };
    (hours * 4 + minutes / 15).min(SLOTS_PER_DAY - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program(days: &[(Weekday, &[(&str, &str)])]) -> TimeProgram {
        let mut program = TimeProgram::default();
        for (weekday, runs) in days {
            program.day_mut(*weekday).timeslots =
                runs.iter().map(|(start, stop)| TimeSlot::new(start, stop)).collect();
        }
        program
    }

    const MONDAY_MORNING: &str = "\
        00000000000000000000000000000000000000000000000000000000\
        00000000000000000000000000000000000000000000000000000000\
        000000000000000000000000FF000000000000000000000000000000";

    #[test]
    fn monday_morning_run() {
        let schedule = program(&[(Weekday::Mon, &[("06:00", "08:00")])]);
        let blob = encode(&schedule);
        assert_eq!(blob, MONDAY_MORNING);
        assert_eq!(decode(&blob).unwrap(), schedule);
    }

    #[test]
    fn sunday_run_ending_at_midnight() {
        let schedule = program(&[(Weekday::Sun, &[("22:00", "00:00")])]);
        let blob = encode(&schedule);
        assert_eq!(
            blob,
            "00000000000000000000000000000000000000000000000000000000\
             00000000000000000000000000000000000000000000000000000000\
             00000000000000000000000000000000FF0000000000000000000000"
        );
        // The run survives the round trip with its end rendered as 00:00.
        assert_eq!(decode(&blob).unwrap(), schedule);
    }

    #[test]
    fn always_on_program() {
        let schedule = program(
            &Weekday::iter()
                .map(|day| (day, &[("00:00", "00:00")] as &[_]))
                .collect::<Vec<_>>(),
        );
        let blob = encode(&schedule);
        assert_eq!(blob, "F".repeat(BLOB_LENGTH));
        assert_eq!(decode(&blob).unwrap(), schedule);
    }

    #[test]
    fn quarter_hour_run() {
        let schedule = program(&[(Weekday::Tue, &[("06:15", "06:45")])]);
        let blob = encode(&schedule);
        assert_eq!(
            blob,
            "00000000000000000000000000000000000000000000000000000000\
             00000000060000000000000000000000000000000000000000000000\
             00000000000000000000000000000000000000000000000000000000"
        );
        // Symmetric within its digit, so this one also round-trips.
        assert_eq!(decode(&blob).unwrap(), schedule);
    }

    #[test]
    fn sub_hour_runs_shift_on_the_round_trip() {
        // The encoder fills digits from the most significant bit while the
        // decoder reads them from the least significant bit. A run covering
        // only the first half of an hour comes back as the second half.
        let schedule = program(&[(Weekday::Mon, &[("06:00", "06:30")])]);
        let decoded = decode(&encode(&schedule)).unwrap();
        assert_eq!(decoded.mon.timeslots, vec![TimeSlot::new("06:30", "07:00")]);
    }

    #[test]
    fn two_runs_on_one_day() {
        let schedule = program(&[(Weekday::Fri, &[("05:00", "07:00"), ("20:00", "23:00")])]);
        let blob = encode(&schedule);
        assert_eq!(
            blob,
            "0000000000000000000000000FFF0000000000000FF0000000000000\
             00000000000000000000000000000000000000000000000000000000\
             00000000000000000000000000000000000000000000000000000000"
        );
        assert_eq!(decode(&blob).unwrap(), schedule);
    }

    #[test]
    fn adjacent_runs_come_back_merged() {
        let schedule = program(&[(Weekday::Wed, &[("06:00", "07:00"), ("07:00", "08:00")])]);
        let blob = encode(&schedule);
        assert_eq!(
            blob,
            "00000000000000000000000000000000000000000000000000000000\
             00000000000000000000000000000000FF0000000000000000000000\
             00000000000000000000000000000000000000000000000000000000"
        );
        assert_eq!(
            decode(&blob).unwrap(),
            program(&[(Weekday::Wed, &[("06:00", "08:00")])])
        );
    }

    #[test]
    fn inactive_timeslots_are_ignored() {
        let mut schedule = program(&[(Weekday::Mon, &[("06:00", "08:00")])]);
        schedule.mon.timeslots[0].on = false;
        assert_eq!(encode(&schedule), "0".repeat(BLOB_LENGTH));
    }

    #[test]
    fn decode_rejects_bad_blobs() {
        assert_eq!(decode(""), Err(DecodeError::BadLength { length: 0 }));
        assert_eq!(
            decode(&"0".repeat(BLOB_LENGTH - 1)),
            Err(DecodeError::BadLength { length: BLOB_LENGTH - 1 })
        );
        let mut blob = "0".repeat(BLOB_LENGTH);
        blob.replace_range(42..43, "G");
        assert_eq!(
            decode(&blob),
            Err(DecodeError::BadHexDigit { character: 'G', position: 42 })
        );
    }

    #[test]
    fn time_grid_helpers() {
        assert_eq!(time_to_slot("06:00"), 24);
        assert_eq!(time_to_slot("06:59"), 27);
        assert_eq!(time_to_slot("24:00"), 95);
        assert_eq!(time_to_slot("garbage"), 0);
        assert_eq!(slot_to_time(24), "06:00");
        assert_eq!(slot_to_time(96), "00:00");
    }
}
