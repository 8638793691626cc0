//! Static catalog of the Remko SMT registers this tool understands.
//!
//! The heat pump firmware addresses every value by a decimal register id; the
//! tables below describe how each known register is typed and labelled. The
//! device may report ids outside this catalog, which callers must skip.

/// How a raw register payload is interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    Switch,
    Action,
    Temperature,
    TemperatureInput,
    /// Electrical/thermal power readout, reported in hundredths of the unit.
    Power,
    /// Accumulated energy readout, reported 1:1.
    Energy,
    Counter,
    Mode,
    Select,
    TimeProgram,
    /// Not a wire register; computed by the session from link liveness.
    GeneratedStatus,
}

impl Kind {
    /// Analog channels are throttled by the state cache. Digital, mode and
    /// schedule channels always commit.
    pub const fn is_rate_limited(self) -> bool {
        matches!(self, Kind::Temperature | Kind::Power | Kind::Energy | Kind::Counter)
    }

    /// Whether the register may appear in the keep-alive `query_list`.
    pub const fn is_queryable(self) -> bool {
        !matches!(self, Kind::GeneratedStatus)
    }
}

/// Handle into the parallel catalog tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegisterIndex(usize);

impl RegisterIndex {
    pub fn from_address(address: u16) -> Option<RegisterIndex> {
        let index = ADDRESSES.partition_point(|v| *v < address);
        (ADDRESSES.get(index) == Some(&address)).then_some(Self(index))
    }

    /// Wire register ids are the decimal address rendered as an ASCII string.
    pub fn from_id(id: &str) -> Option<RegisterIndex> {
        Self::from_address(id.parse().ok()?)
    }

    pub fn from_name(name: &str) -> Option<RegisterIndex> {
        let index = NAMES.iter().position(|v| *v == name);
        index.map(Self)
    }

    pub fn all() -> impl Iterator<Item = RegisterIndex> {
        (0..ADDRESSES.len()).map(Self)
    }

    pub fn address(&self) -> u16 {
        ADDRESSES[self.0]
    }

    pub fn id(&self) -> String {
        self.address().to_string()
    }

    pub fn name(&self) -> &'static str {
        NAMES[self.0]
    }

    pub fn kind(&self) -> Kind {
        KINDS[self.0]
    }

    pub fn unit(&self) -> Option<&'static str> {
        UNITS[self.0]
    }

    pub fn minimum(&self) -> Option<f64> {
        MINIMUM_VALUES[self.0]
    }

    pub fn maximum(&self) -> Option<f64> {
        MAXIMUM_VALUES[self.0]
    }

    pub fn label(&self, language: Language) -> Option<&'static str> {
        translate(self.name(), language)
    }
}

macro_rules! for_each_register {
    ($m:ident) => {
        $m! {
            0:    GeneratedStatus,  "communication_status";
            1079: Select,           "dhw_opmode",           min = 0.0, max = 16.0;
            1082: TemperatureInput, "water_temp_req",       unit = "ºC", min = 20.0, max = 60.0;
            1893: Switch,           "absence_mode";
            1894: Switch,           "party_mode";
            1951: Select,           "main_mode";
            1972: Switch,           "fixed_value";
            1974: TemperatureInput, "fixed_value_temp_req", unit = "ºC", min = 20.0, max = 60.0;
            5001: Mode,             "opmode";
            5027: Temperature,      "circulation_temp",     unit = "ºC", min = 0.0, max = 70.0;
            5032: Temperature,      "out_temp",             unit = "ºC", min = 0.0, max = 40.0;
            5039: Temperature,      "water_temp",           unit = "ºC", min = 0.0, max = 70.0;
            5051: Mode,             "heat_gen_status";
            5055: Temperature,      "mixed_temp",           unit = "ºC", min = 0.0, max = 40.0;
            5085: Temperature,      "buffer_temp_target",   unit = "ºC", min = 0.0, max = 70.0;
            5131: Temperature,      "buffer_temp",          unit = "ºC", min = 0.0, max = 70.0;
            5310: TimeProgram,      "heating_timeprogram";
            5311: TimeProgram,      "dhw_timeprogram";
            5320: Power,            "el_consumption",       unit = "W", min = 0.0, max = 6000.0;
            5321: Power,            "th_consumption",       unit = "W", min = 0.0, max = 20000.0;
            5693: Action,           "dhw_heating";
        }
    };
}

macro_rules! optional {
    () => {
        None
    };
    ($($lit: tt)+) => {
        Some($($lit)*)
    };
}

macro_rules! make_lists {
    ($($address: literal: $kind: ident, $name: literal
        $(, unit = $unit: literal)? $(, min = $min: literal)? $(, max = $max: literal)?;)+) => {
        pub static ADDRESSES: &[u16] = &[$($address),*];
        pub static NAMES: &[&str] = &[$($name),*];
        pub static KINDS: &[Kind] = &[$(Kind::$kind),*];
        pub static UNITS: &[Option<&'static str>] = &[$(optional!($($unit)?)),*];
        pub static MINIMUM_VALUES: &[Option<f64>] = &[$(optional!($($min)?)),*];
        pub static MAXIMUM_VALUES: &[Option<f64>] = &[$(optional!($($max)?)),*];
    };
}

for_each_register!(make_lists);

const _ASSERT_SORTED: () = {
    let mut index = 1;
    while index < ADDRESSES.len() {
        assert!(
            ADDRESSES[index - 1] < ADDRESSES[index],
            "ADDRESSES is not sorted (or has duplicate values)!"
        );
        index += 1;
    }
};

/// Languages the translation table carries display strings for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, clap::ValueEnum, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    De,
}

/// Value range of an enumerated select register.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SelectOptions {
    /// Translation key prefix the option index is appended to.
    pub prefix: &'static str,
    /// First index transmitted on the wire.
    pub start: u8,
    pub count: u8,
}

pub fn select_options(register_name: &str) -> Option<SelectOptions> {
    Some(match register_name {
        "main_mode" => SelectOptions { prefix: "mode", start: 1, count: 4 },
        "dhw_opmode" => SelectOptions { prefix: "dhwopmode", start: 0, count: 4 },
        "timemode" => SelectOptions { prefix: "timemode", start: 0, count: 2 },
        "user_profile" => SelectOptions { prefix: "user_profile", start: 0, count: 3 },
        _ => return None,
    })
}

/// Translation key prefix for a select register's raw value.
pub fn select_prefix(register_name: &str) -> &'static str {
    select_options(register_name).map(|options| options.prefix).unwrap_or("mode")
}

/// Looks up the display string for a label key: a register name, or an
/// enumeration key such as `opmode6` or `dhwopmode1`.
pub fn translate(key: &str, language: Language) -> Option<&'static str> {
    let strings: [&'static str; 2] = match key {
        "water_temp_req" => ["Water temp. req.", "Warmwasser soll"],
        "buffer_temp_target" => ["Buffer temp. target", "Heizwasser Soll"],
        "fixed_value_temp_req" => ["Fixed value temp. req.", "Festwert soll"],
        "out_temp" => ["Outside temp.", "Außentemperatur"],
        "mixed_temp" => ["Mixed circle temp.", "Mischkreis Temp."],
        "water_temp" => ["Water temp.", "Warmwasser Temp."],
        "buffer_temp" => ["Buffer temp.", "Heizwasser Temp."],
        "circulation_temp" => ["Circulation temp.", "Zirkulation Temp."],
        "el_consumption" => ["Electr. power", "Leistung elektrisch"],
        "th_consumption" => ["Therm. power", "Leistung thermisch"],
        "main_mode" => ["Room climate mode", "Raumklima Modus"],
        "opmode" => ["Operating mode", "Betriebsmodus"],
        "heat_gen_status" => ["Heat generator status", "Wärmeerzeuger Status"],
        "dhw_opmode" => ["DHW mode", "WW Modus"],
        "absence_mode" => ["Absence mode", "Abwesenheitsmodus"],
        "party_mode" => ["Party mode", "Partymodus"],
        "fixed_value" => ["Fixed value", "Festwert"],
        "dhw_heating" => ["1x DHW heating", "1x WW aufheizen"],
        "heating_timeprogram" => ["Heating time program", "Heizung Zeitprogramm"],
        "dhw_timeprogram" => ["DHW time program", "WW Zeitprogramm"],
        "communication_status" => ["Communication", "Kommunikation"],
        "mode1" => ["Auto", "Auto"],
        "mode2" => ["Heating", "Heizen"],
        "mode3" => ["Standby", "Standby"],
        "mode4" => ["Cooling", "Kühlen"],
        "dhwopmode0" => ["Automatic comfort", "Automatik Komfort"],
        "dhwopmode1" => ["Automatic eco", "Automatik Eco"],
        "dhwopmode2" => ["Solar/PV only", "Nur Solar/PV"],
        "dhwopmode3" => ["Off", "Aus"],
        "timemode0" => ["Week program 1", "Wochenprogramm 1"],
        "timemode1" => ["Week program 2", "Wochenprogramm 2"],
        "user_profile0" => ["Profile 1", "Profil 1"],
        "user_profile1" => ["Profile 2", "Profil 2"],
        "user_profile2" => ["Profile 3", "Profil 3"],
        "opmode1" => ["Forced off", "Zwangsabschaltung"],
        "opmode2" => ["Defrosting", "Abtauen"],
        "opmode3" => ["Load defr. buffer", "Abtaupuffer laden"],
        "opmode4" => ["DHW loading", "WW Bereitung"],
        "opmode5" => ["Storage energy", "Speicherenergie"],
        "opmode6" => ["Heating", "Heizen"],
        "opmode7" => ["Cooling", "Kühlen"],
        "opmode8" => ["Pool heating", "Pool"],
        "opmode9" => ["Idle", "Umwälzung"],
        "opmode10" => ["Standby", "Standby"],
        "opmode11" => ["Screed drying", "Estrichtrocknung"],
        "opmode12" => ["Frost protection", "Frostschutz"],
        "opmode13" => ["Test mode", "Prüfbetrieb"],
        "opmode14" => ["Blocking signal", "Sperrsignal"],
        "opmode15" => ["Hygiene function", "Hygienefunktion"],
        "opmode16" => ["Silent mode", "Silent Modus"],
        "heatgenstatus0" => ["OFF", "Aus"],
        "heatgenstatus1" => ["ON", "An"],
        _ => return None,
    };
    Some(strings[match language {
        Language::En => 0,
        Language::De => 1,
    }])
}
