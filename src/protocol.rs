use std::fmt;
use std::str::FromStr;

use crate::error::{PrintResult, TesterError};

/// Start of a ZPL label format.
pub const FORMAT_START: &str = "^XA";
/// End of a ZPL label format.
pub const FORMAT_END: &str = "^XZ";

/// Command dialect a connected printer reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlLanguage {
    Zpl,
    Cpcl,
    LinePrint,
}

impl ControlLanguage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlLanguage::Zpl => "zpl",
            ControlLanguage::Cpcl => "cpcl",
            ControlLanguage::LinePrint => "line_print",
        }
    }
}

impl fmt::Display for ControlLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlLanguage {
    type Err = String;

    /// Parses the names Zebra printers report for `device.languages`.
    ///
    /// Hybrid modes that still accept ZPL (`hybrid_xml_zpl`) count as ZPL.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().trim_matches('"').to_ascii_lowercase();
        match name.as_str() {
            "zpl" | "zpl ii" | "hybrid_xml_zpl" => Ok(ControlLanguage::Zpl),
            "cpcl" => Ok(ControlLanguage::Cpcl),
            "line_print" | "line" => Ok(ControlLanguage::LinePrint),
            other => Err(format!("unknown control language {:?}", other)),
        }
    }
}

/// Builds a single ZPL label format (`^XA` ... `^XZ`).
///
/// Commands are appended without separators, so the output is exactly the
/// concatenation of the commands in call order.
#[derive(Debug, Clone, Default)]
pub struct ZplBuilder {
    body: String,
}

impl ZplBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// `^PW`: print width in dots.
    pub fn print_width(&mut self, dots: u32) -> &mut Self {
        self.body.push_str(&format!("^PW{}", dots));
        self
    }

    /// `^LT`: label top offset in dot rows.
    pub fn label_top(&mut self, dots: i32) -> &mut Self {
        self.body.push_str(&format!("^LT{}", dots));
        self
    }

    /// `^FO`: field origin.
    pub fn field_origin(&mut self, x: u32, y: u32) -> &mut Self {
        self.body.push_str(&format!("^FO{},{}", x, y));
        self
    }

    /// `^A`: scalable/bitmapped font selection, e.g. `^ADN,36,20`.
    pub fn font(&mut self, font: char, orientation: char, height: u32, width: u32) -> &mut Self {
        self.body
            .push_str(&format!("^A{}{},{},{}", font, orientation, height, width));
        self
    }

    /// `^FD` ... `^FS`: field data.
    ///
    /// Text containing the ZPL command prefixes `^` or `~` is rejected since
    /// the printer would read it as a new command.
    pub fn field_data(&mut self, text: &str) -> PrintResult<&mut Self> {
        if text.contains(['^', '~']) {
            return Err(TesterError::InvalidField(text.to_string()));
        }
        self.body.push_str("^FD");
        self.body.push_str(text);
        self.body.push_str("^FS");
        Ok(self)
    }

    /// Wraps the accumulated commands in `^XA` / `^XZ`.
    pub fn build(&self) -> String {
        let mut out = String::with_capacity(FORMAT_START.len() + self.body.len() + FORMAT_END.len());
        out.push_str(FORMAT_START);
        out.push_str(&self.body);
        out.push_str(FORMAT_END);
        out
    }
}

/// Label dimensions sent before the first print.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelGeometry {
    pub width_dots: u32,
    pub top_offset: i32,
}

impl Default for LabelGeometry {
    fn default() -> Self {
        Self {
            width_dots: 408,
            top_offset: 16,
        }
    }
}

impl LabelGeometry {
    /// `^XA^PW408^LT16^XZ` for the default geometry.
    pub fn to_zpl(&self) -> String {
        ZplBuilder::new()
            .print_width(self.width_dots)
            .label_top(self.top_offset)
            .build()
    }
}

/// A one-field text label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestLabel {
    pub x: u32,
    pub y: u32,
    pub font: char,
    pub orientation: char,
    pub char_height: u32,
    pub char_width: u32,
    pub text: String,
}

impl Default for TestLabel {
    fn default() -> Self {
        Self {
            x: 50,
            y: 50,
            font: 'D',
            orientation: 'N',
            char_height: 36,
            char_width: 20,
            text: "TEST".to_string(),
        }
    }
}

impl TestLabel {
    /// `^XA^FO50,50^ADN,36,20^FDTEST^FS^XZ` for the default label.
    pub fn to_zpl(&self) -> PrintResult<String> {
        let mut zpl = ZplBuilder::new();
        zpl.field_origin(self.x, self.y)
            .font(self.font, self.orientation, self.char_height, self.char_width)
            .field_data(&self.text)?;
        Ok(zpl.build())
    }
}
