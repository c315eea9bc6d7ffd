//! tmux window layout strings.
//!
//! ```text
//! layout := [checksum ","] node
//! node   := W "x" H "," X "," Y ( "," PANE | "{" nodes "}" | "[" nodes "]" )
//! nodes  := node ( "," node )*
//! ```
//!
//! `{}` splits left-right, `[]` top-bottom. Every leaf carries the numeric
//! pane id it displays.

use deckterm_core::PaneId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutNode {
    pub width: u16,
    pub height: u16,
    pub x: u16,
    pub y: u16,
    pub kind: LayoutKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutKind {
    /// Leaf. Some old layouts omit the pane id.
    Pane(Option<PaneId>),
    LeftRight(Vec<LayoutNode>),
    TopBottom(Vec<LayoutNode>),
}

/// Geometry of one leaf pane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaneGeometry {
    pub pane_id: PaneId,
    pub width: u16,
    pub height: u16,
    pub x: u16,
    pub y: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid layout at byte {offset}: {reason}")]
pub struct LayoutError {
    pub offset: usize,
    pub reason: &'static str,
}

impl LayoutNode {
    /// Leaf panes in layout order.
    pub fn panes(&self) -> Vec<PaneGeometry> {
        let mut out = Vec::new();
        self.collect_panes(&mut out);
        out
    }

    fn collect_panes(&self, out: &mut Vec<PaneGeometry>) {
        match &self.kind {
            LayoutKind::Pane(Some(pane_id)) => out.push(PaneGeometry {
                pane_id: *pane_id,
                width: self.width,
                height: self.height,
                x: self.x,
                y: self.y,
            }),
            LayoutKind::Pane(None) => {}
            LayoutKind::LeftRight(children) | LayoutKind::TopBottom(children) => {
                for child in children {
                    child.collect_panes(out);
                }
            }
        }
    }
}

/// Parse a full layout string, checksum prefix optional.
pub fn parse_layout(layout: &str) -> Result<LayoutNode, LayoutError> {
    let body = strip_checksum(layout);
    let offset = layout.len() - body.len();
    let mut cursor = Cursor {
        bytes: body.as_bytes(),
        pos: 0,
        base: offset,
    };
    let node = cursor.node()?;
    if cursor.pos != cursor.bytes.len() {
        return Err(cursor.error("trailing characters"));
    }
    Ok(node)
}

/// `d3da,211x50,...` -> `211x50,...`
fn strip_checksum(layout: &str) -> &str {
    match layout.split_once(',') {
        Some((head, rest))
            if !head.is_empty() && !head.contains('x') && head.bytes().all(|b| b.is_ascii_hexdigit()) =>
        {
            rest
        }
        _ => layout,
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
    base: usize,
}

impl Cursor<'_> {
    fn error(&self, reason: &'static str) -> LayoutError {
        LayoutError {
            offset: self.base + self.pos,
            reason,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn expect(&mut self, b: u8, reason: &'static str) -> Result<(), LayoutError> {
        if self.peek() == Some(b) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(reason))
        }
    }

    fn number(&mut self) -> Result<u32, LayoutError> {
        let start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(self.error("expected number"));
        }
        std::str::from_utf8(&self.bytes[start..self.pos])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| self.error("number out of range"))
    }

    fn dimension(&mut self) -> Result<u16, LayoutError> {
        let n = self.number()?;
        u16::try_from(n).map_err(|_| self.error("dimension out of range"))
    }

    fn node(&mut self) -> Result<LayoutNode, LayoutError> {
        let width = self.dimension()?;
        self.expect(b'x', "expected 'x'")?;
        let height = self.dimension()?;
        self.expect(b',', "expected ','")?;
        let x = self.dimension()?;
        self.expect(b',', "expected ','")?;
        let y = self.dimension()?;

        let kind = match self.peek() {
            Some(b'{') => LayoutKind::LeftRight(self.children(b'}')?),
            Some(b'[') => LayoutKind::TopBottom(self.children(b']')?),
            Some(b',') => {
                // Either ",PANE" or the start of the next sibling ",WxH...".
                let save = self.pos;
                self.pos += 1;
                match self.number() {
                    Ok(id) if self.peek() != Some(b'x') => LayoutKind::Pane(Some(PaneId(id))),
                    _ => {
                        self.pos = save;
                        LayoutKind::Pane(None)
                    }
                }
            }
            _ => LayoutKind::Pane(None),
        };

        Ok(LayoutNode {
            width,
            height,
            x,
            y,
            kind,
        })
    }

    fn children(&mut self, close: u8) -> Result<Vec<LayoutNode>, LayoutError> {
        self.pos += 1; // opening bracket
        let mut children = Vec::new();
        loop {
            children.push(self.node()?);
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b) if b == close => {
                    self.pos += 1;
                    return Ok(children);
                }
                _ => return Err(self.error("unterminated child list")),
            }
        }
    }
}
