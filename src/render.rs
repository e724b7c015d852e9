// Row presentation for the message list
// Own messages sit on the right in a light bubble, everyone else's on the
// left in a dark one.

use crate::models::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrandColor {
    Purple,
    LightPurple,
}

impl BrandColor {
    pub fn rgb(self) -> (u8, u8, u8) {
        match self {
            BrandColor::Purple => (0xAC, 0x48, 0xDF),
            BrandColor::LightPurple => (0xF1, 0xDC, 0xFF),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowStyle {
    pub side: Side,
    pub bubble: BrandColor,
    pub text: BrandColor,
}

impl RowStyle {
    pub const OWN: RowStyle = RowStyle {
        side: Side::Right,
        bubble: BrandColor::LightPurple,
        text: BrandColor::Purple,
    };

    pub const OTHER: RowStyle = RowStyle {
        side: Side::Left,
        bubble: BrandColor::Purple,
        text: BrandColor::LightPurple,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Row<'a> {
    pub sender: &'a str,
    pub body: &'a str,
    pub style: RowStyle,
}

pub fn row_style(message: &Message, viewer: Option<&str>) -> RowStyle {
    match viewer {
        Some(viewer) if !viewer.is_empty() && message.sender() == viewer => RowStyle::OWN,
        _ => RowStyle::OTHER,
    }
}

pub fn rows<'a>(messages: &'a [Message], viewer: Option<&str>) -> Vec<Row<'a>> {
    messages
        .iter()
        .map(|message| Row {
            sender: message.sender(),
            body: message.body(),
            style: row_style(message, viewer),
        })
        .collect()
}
