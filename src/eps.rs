//! Encapsulated PostScript drawing backend for plotters.
//!
//! Shapes are written as PostScript operators into an in-memory page and
//! flushed to disk on `present` (or on drop). PostScript has no
//! transparency, so translucent colours are blended against white.

use plotters_backend::text_anchor::{HPos, VPos};
use plotters_backend::{
    BackendColor, BackendCoord, BackendStyle, BackendTextStyle, DrawingBackend, DrawingErrorKind, FontStyle,
    FontTransform,
};
use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufWriter, Error, Write};
use std::path::Path;

/// Ratio of plotters' pixel font size to the PostScript point size, as the
/// SVG backend uses.
const FONT_SCALE: f64 = 1.24;

pub struct EpsBackend<'a> {
    path: &'a Path,
    size: (u32, u32),
    body: String,
    saved: bool,
}

impl<'a> EpsBackend<'a> {
    pub fn new<T: AsRef<Path> + ?Sized>(path: &'a T, size: (u32, u32)) -> Self {
        Self {
            path: path.as_ref(),
            size,
            body: String::new(),
            saved: false,
        }
    }

    /// Full document: header, prolog, page body and trailer.
    pub fn document(&self) -> String {
        let (w, h) = self.size;
        let mut doc = String::with_capacity(self.body.len() + 256);
        doc.push_str("%!PS-Adobe-3.0 EPSF-3.0\n");
        let _ = writeln!(doc, "%%BoundingBox: 0 0 {w} {h}");
        doc.push_str("%%Creator: nnplot\n%%LanguageLevel: 2\n%%EndComments\n");
        doc.push_str("gsave\n1 setlinejoin 1 setlinecap\n");
        doc.push_str(&self.body);
        doc.push_str("grestore\nshowpage\n%%EOF\n");
        doc
    }

    /// PostScript y grows upwards from the bottom edge.
    fn flip(&self, (x, y): BackendCoord) -> (i32, i32) {
        (x, self.size.1 as i32 - y)
    }

    fn set_color(&mut self, color: BackendColor) {
        let (r, g, b) = blend_on_white(color);
        let _ = writeln!(self.body, "{r:.3} {g:.3} {b:.3} setrgbcolor");
    }

    fn trace<I: IntoIterator<Item = BackendCoord>>(&mut self, points: I) -> bool {
        let mut any = false;
        self.body.push_str("newpath\n");
        for point in points {
            let (x, y) = self.flip(point);
            let op = if any { "lineto" } else { "moveto" };
            let _ = writeln!(self.body, "{x} {y} {op}");
            any = true;
        }
        any
    }
}

/// Colour channels in [0, 1] after compositing over white.
fn blend_on_white(color: BackendColor) -> (f64, f64, f64) {
    let alpha = color.alpha.clamp(0.0, 1.0);
    let mix = |c: u8| 1.0 - alpha * (1.0 - c as f64 / 255.0);
    (mix(color.rgb.0), mix(color.rgb.1), mix(color.rgb.2))
}

/// Standard-35 font for a plotters family and style.
fn font_name(family: &str, style: FontStyle) -> &'static str {
    match (family, style) {
        ("serif", FontStyle::Bold) => "Times-Bold",
        ("serif", FontStyle::Italic | FontStyle::Oblique) => "Times-Italic",
        ("serif", _) => "Times-Roman",
        ("monospace", FontStyle::Bold) => "Courier-Bold",
        ("monospace", FontStyle::Italic | FontStyle::Oblique) => "Courier-Oblique",
        ("monospace", _) => "Courier",
        (_, FontStyle::Bold) => "Helvetica-Bold",
        (_, FontStyle::Italic | FontStyle::Oblique) => "Helvetica-Oblique",
        _ => "Helvetica",
    }
}

/// Text as a PostScript string literal. The standard fonts only cover
/// Latin-1, so the Greek letters used in axis labels are spelled out.
fn ps_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('(');
    for c in text.chars() {
        match c {
            '(' | ')' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            'θ' => out.push_str("theta"),
            'Δ' => out.push_str("d"),
            'σ' => out.push_str("sigma"),
            '×' => out.push('x'),
            '±' => out.push_str("+/-"),
            c if c.is_ascii() => out.push(c),
            _ => out.push('?'),
        }
    }
    out.push(')');
    out
}

impl<'a> DrawingBackend for EpsBackend<'a> {
    type ErrorType = Error;

    fn get_size(&self) -> (u32, u32) {
        self.size
    }

    fn ensure_prepared(&mut self) -> Result<(), DrawingErrorKind<Error>> {
        Ok(())
    }

    fn present(&mut self) -> Result<(), DrawingErrorKind<Error>> {
        if !self.saved {
            let file = File::create(self.path).map_err(DrawingErrorKind::DrawingError)?;
            let mut file = BufWriter::new(file);
            file.write_all(self.document().as_bytes())
                .and_then(|_| file.flush())
                .map_err(DrawingErrorKind::DrawingError)?;
            self.saved = true;
        }
        Ok(())
    }

    fn draw_pixel(&mut self, point: BackendCoord, color: BackendColor) -> Result<(), DrawingErrorKind<Error>> {
        if color.alpha == 0.0 {
            return Ok(());
        }
        self.set_color(color);
        let (x, y) = self.flip(point);
        let _ = writeln!(self.body, "{x} {} 1 1 rectfill", y - 1);
        Ok(())
    }

    fn draw_line<S: BackendStyle>(
        &mut self,
        from: BackendCoord,
        to: BackendCoord,
        style: &S,
    ) -> Result<(), DrawingErrorKind<Error>> {
        self.draw_path([from, to], style)
    }

    fn draw_rect<S: BackendStyle>(
        &mut self,
        upper_left: BackendCoord,
        bottom_right: BackendCoord,
        style: &S,
        fill: bool,
    ) -> Result<(), DrawingErrorKind<Error>> {
        if style.color().alpha == 0.0 {
            return Ok(());
        }
        self.set_color(style.color());
        let (x, y) = self.flip((upper_left.0, bottom_right.1));
        let w = bottom_right.0 - upper_left.0;
        let h = bottom_right.1 - upper_left.1;
        if fill {
            let _ = writeln!(self.body, "{x} {y} {w} {h} rectfill");
        } else {
            let _ = writeln!(self.body, "{} setlinewidth {x} {y} {w} {h} rectstroke", style.stroke_width());
        }
        Ok(())
    }

    fn draw_path<S: BackendStyle, I: IntoIterator<Item = BackendCoord>>(
        &mut self,
        path: I,
        style: &S,
    ) -> Result<(), DrawingErrorKind<Error>> {
        if style.color().alpha == 0.0 {
            return Ok(());
        }
        self.set_color(style.color());
        let _ = writeln!(self.body, "{} setlinewidth", style.stroke_width());
        if self.trace(path) {
            self.body.push_str("stroke\n");
        }
        Ok(())
    }

    fn fill_polygon<S: BackendStyle, I: IntoIterator<Item = BackendCoord>>(
        &mut self,
        vert: I,
        style: &S,
    ) -> Result<(), DrawingErrorKind<Error>> {
        if style.color().alpha == 0.0 {
            return Ok(());
        }
        self.set_color(style.color());
        if self.trace(vert) {
            self.body.push_str("closepath fill\n");
        }
        Ok(())
    }

    fn draw_circle<S: BackendStyle>(
        &mut self,
        center: BackendCoord,
        radius: u32,
        style: &S,
        fill: bool,
    ) -> Result<(), DrawingErrorKind<Error>> {
        if style.color().alpha == 0.0 {
            return Ok(());
        }
        self.set_color(style.color());
        let (x, y) = self.flip(center);
        let paint = if fill {
            "fill".to_string()
        } else {
            format!("{} setlinewidth stroke", style.stroke_width())
        };
        let _ = writeln!(self.body, "newpath {x} {y} {radius} 0 360 arc closepath {paint}");
        Ok(())
    }

    fn draw_text<TStyle: BackendTextStyle>(
        &mut self,
        text: &str,
        style: &TStyle,
        pos: BackendCoord,
    ) -> Result<(), DrawingErrorKind<Error>> {
        let color = style.color();
        if color.alpha == 0.0 {
            return Ok(());
        }
        self.set_color(color);

        let size = style.size() / FONT_SCALE;
        let anchor = style.anchor();
        let shift_x = match anchor.h_pos {
            HPos::Left => 0.0,
            HPos::Center => 0.5,
            HPos::Right => 1.0,
        };
        // Baseline offset, relative to the anchor point.
        let shift_y = match anchor.v_pos {
            VPos::Top => -0.76 * size,
            VPos::Center => -0.35 * size,
            VPos::Bottom => 0.2 * size,
        };
        // plotters rotates clockwise on a y-down canvas.
        let angle = match style.transform() {
            FontTransform::None => 0,
            FontTransform::Rotate90 => -90,
            FontTransform::Rotate180 => 180,
            FontTransform::Rotate270 => 90,
        };

        let (x, y) = self.flip(pos);
        let font = font_name(style.family().as_str(), style.style());
        let literal = ps_string(text);
        let _ = writeln!(
            self.body,
            "gsave /{font} findfont {size:.2} scalefont setfont {x} {y} translate {angle} rotate \
             0 0 moveto {literal} dup stringwidth pop {shift_x} mul neg {shift_y:.2} rmoveto show grestore"
        );
        Ok(())
    }
}

impl Drop for EpsBackend<'_> {
    fn drop(&mut self) {
        if !self.saved {
            // Errors cannot surface from drop; `present` reports them when called.
            let _ = self.present();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plotters::prelude::*;
    use tempfile::TempDir;

    #[test]
    fn document_has_eps_header_and_trailer() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.eps");
        let backend = EpsBackend::new(&path, (300, 200));
        let doc = backend.document();
        assert!(doc.starts_with("%!PS-Adobe-3.0 EPSF-3.0\n"));
        assert!(doc.contains("%%BoundingBox: 0 0 300 200"));
        assert!(doc.trim_end().ends_with("%%EOF"));
    }

    #[test]
    fn shapes_are_flipped_into_postscript_space() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shapes.eps");
        let mut backend = EpsBackend::new(&path, (100, 100));
        backend.draw_line((0, 0), (10, 20), &BLACK).unwrap();
        backend.draw_rect((10, 10), (30, 40), &RED, true).unwrap();
        backend.draw_circle((50, 50), 5, &BLUE, false).unwrap();
        let doc = backend.document();
        assert!(doc.contains("0 100 moveto\n10 80 lineto\nstroke"));
        assert!(doc.contains("10 60 20 30 rectfill"));
        assert!(doc.contains("50 50 5 0 360 arc"));
    }

    #[test]
    fn translucent_colors_blend_toward_white() {
        let half_red = BackendColor {
            alpha: 0.5,
            rgb: (255, 0, 0),
        };
        assert_eq!(blend_on_white(half_red), (1.0, 0.5, 0.5));
        let opaque = BackendColor {
            alpha: 1.0,
            rgb: (0, 0, 0),
        };
        assert_eq!(blend_on_white(opaque), (0.0, 0.0, 0.0));
    }

    #[test]
    fn strings_are_escaped_and_transliterated() {
        assert_eq!(ps_string("f(x) \\ y"), "(f\\(x\\) \\\\ y)");
        assert_eq!(ps_string("θe [K]"), "(thetae [K])");
        assert_eq!(ps_string("ΔT"), "(dT)");
    }

    #[test]
    fn chart_renders_to_file_on_present() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chart.eps");
        {
            let root = EpsBackend::new(&path, (400, 300)).into_drawing_area();
            root.fill(&WHITE).unwrap();
            let mut chart = ChartBuilder::on(&root)
                .caption("θ profile", ("sans-serif", 20))
                .x_label_area_size(30)
                .y_label_area_size(30)
                .build_cartesian_2d(0.0..1.0, 0.0..1.0)
                .unwrap();
            chart.configure_mesh().draw().unwrap();
            chart
                .draw_series(LineSeries::new(vec![(0.0, 0.0), (1.0, 1.0)], &RED))
                .unwrap();
            root.present().unwrap();
        }
        let doc = std::fs::read_to_string(&path).unwrap();
        assert!(doc.starts_with("%!PS-Adobe-3.0 EPSF-3.0"));
        assert!(doc.contains("(theta profile)"));
        assert!(doc.contains("showpage"));
    }
}
