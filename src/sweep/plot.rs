use std::fs;
use std::io::Cursor;
use std::path::Path;

use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use plotters::prelude::LineSeries;
use plotters::prelude::*;

use crate::sweep::SweepError;
use crate::types::SweepPoint;

#[derive(Clone, Debug)]
pub struct PlotStyle {
    pub width: u32,
    pub height: u32,
    pub background: RGBColor,
    pub line: RGBColor,
}

impl Default for PlotStyle {
    fn default() -> Self {
        Self {
            width: 1200,
            height: 600,
            background: WHITE,
            line: RGBColor(200, 40, 40),
        }
    }
}

/// Caption and axis labels of one curve.
#[derive(Clone, Copy, Debug)]
pub struct CurveLabels<'a> {
    pub caption: &'a str,
    pub x: &'a str,
    pub y: &'a str,
}

pub const VOLTAGE_LABELS: CurveLabels<'static> = CurveLabels {
    caption: "Voltage vs frequency",
    x: "Frequency, MHz",
    y: "Voltage, V",
};

pub const SENSITIVITY_LABELS: CurveLabels<'static> = CurveLabels {
    caption: "Sensitivity vs frequency",
    x: "Frequency, MHz",
    y: "Sensitivity, dB",
};

pub fn voltage_curve(points: &[SweepPoint]) -> Vec<(f64, f64)> {
    points.iter().map(|p| (p.frequency_mhz, p.voltage_v)).collect()
}

pub fn sensitivity_curve(points: &[SweepPoint]) -> Vec<(f64, f64)> {
    points.iter().map(|p| (p.frequency_mhz, p.sensitivity_db)).collect()
}

fn padded_range(values: impl Iterator<Item = f64> + Clone) -> (f64, f64) {
    let lo = values.clone().fold(f64::INFINITY, f64::min);
    let hi = values.fold(f64::NEG_INFINITY, f64::max);
    if !lo.is_finite() || !hi.is_finite() {
        return (0.0, 1.0);
    }
    if (hi - lo).abs() < f64::EPSILON {
        return (lo - 1.0, hi + 1.0);
    }
    let pad = (hi - lo) * 0.05;
    (lo - pad, hi + pad)
}

pub fn render_curve_png(
    curve: &[(f64, f64)],
    labels: CurveLabels<'_>,
    style: &PlotStyle,
) -> Result<Vec<u8>, SweepError> {
    if curve.is_empty() {
        return Err(SweepError::Plot(format!("'{}' has no points", labels.caption)));
    }
    let mut buffer = vec![0u8; (style.width * style.height * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (style.width, style.height))
            .into_drawing_area();
        root.fill(&style.background)?;
        let x_range = padded_range(curve.iter().map(|(x, _)| *x));
        let y_range = padded_range(curve.iter().map(|(_, y)| *y));
        let mut chart = ChartBuilder::on(&root)
            .margin(15)
            .caption(labels.caption, ("sans-serif", 22).into_font().color(&BLACK))
            .set_label_area_size(LabelAreaPosition::Left, 60)
            .set_label_area_size(LabelAreaPosition::Bottom, 45)
            .build_cartesian_2d(x_range.0..x_range.1, y_range.0..y_range.1)?;
        chart
            .configure_mesh()
            .x_desc(labels.x)
            .y_desc(labels.y)
            .light_line_style(&BLACK.mix(0.08))
            .bold_line_style(&BLACK.mix(0.25))
            .draw()?;
        chart.draw_series(LineSeries::new(curve.iter().copied(), &style.line))?;
        root.present()?;
    }
    encode_png(&buffer, style.width, style.height)
}

/// Renders `curve` and writes the PNG to `path`, creating parent directories.
pub fn write_curve_png(
    path: &Path,
    curve: &[(f64, f64)],
    labels: CurveLabels<'_>,
    style: &PlotStyle,
) -> Result<(), SweepError> {
    let png = render_curve_png(curve, labels, style)?;
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    fs::write(path, png)?;
    Ok(())
}

fn encode_png(buffer: &[u8], width: u32, height: u32) -> Result<Vec<u8>, SweepError> {
    let image = ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, buffer.to_vec())
        .ok_or_else(|| SweepError::Plot("failed to allocate image buffer".into()))?;
    let mut output = Vec::new();
    let dynamic = DynamicImage::ImageRgb8(image);
    dynamic.write_to(&mut Cursor::new(&mut output), ImageFormat::Png)?;
    Ok(output)
}
