use super::{command, Error as PrinterError, Printer};

use std::fmt::{self, Debug};
use std::mem;

use image::{GrayImage, ImageFormat};
use tracing::info;

/// Number of pins on the print head. Every raster line covers all of them.
pub const CANVAS_WIDTH: u32 = 128;

const LINE_BYTES: usize = (CANVAS_WIDTH / 8) as usize;
const HEADER_LEN: usize = command::RASTER_LINE_HEADER.len();

/// Luma value of a pixel that receives ink. Everything else stays blank.
const INK: u8 = 0x00;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("The image width must be a multiple of 8 pixels (got {0}).")]
    WidthNotByteAligned(u32),

    #[error("The image is too wide for the print head (got {0} pixels, at most 128 are possible).")]
    TooWide(u32),

    #[error("Unable to decode the image: {0}")]
    Decode(#[from] image::ImageError),
}

struct BitWriter<'a> {
    output: &'a mut [u8],
    bit_idx: usize,
}

impl<'a> BitWriter<'a> {
    fn new(output: &'a mut [u8]) -> Self {
        Self { output, bit_idx: 7 }
    }

    fn write_bit(&mut self, bit: bool) {
        self.output[0] |= (bit as u8) << self.bit_idx;

        if self.bit_idx == 0 {
            // Borrow checker shenanigans ...
            let output = mem::take(&mut self.output);
            self.output = &mut output[1..];

            self.bit_idx = 7;
        } else {
            self.bit_idx -= 1;
        }
    }

    fn skip(&mut self, bits: u32) {
        for _ in 0..bits {
            self.write_bit(false);
        }
    }
}

/// Blank pixels around a bitmap to center it on the print head.
/// An odd remainder goes to the right edge.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Padding {
    pub left: u32,
    pub right: u32,
}

impl Padding {
    pub fn for_width(width: u32) -> Result<Self, Error> {
        if width > CANVAS_WIDTH {
            return Err(Error::TooWide(width));
        }

        if width % 8 != 0 {
            return Err(Error::WidthNotByteAligned(width));
        }

        let left = (CANVAS_WIDTH - width) / 2;
        let right = CANVAS_WIDTH - (width + left);

        Ok(Self { left, right })
    }
}

/// One row of print data: the raster command header and 128 pixels, MSB first, 1 meaning ink.
#[derive(Clone, PartialEq, Eq)]
pub struct RasterLine([u8; HEADER_LEN + LINE_BYTES]);

impl RasterLine {
    fn blank() -> Self {
        let mut bytes = [0x00; HEADER_LEN + LINE_BYTES];
        bytes[..HEADER_LEN].copy_from_slice(&command::RASTER_LINE_HEADER);

        Self(bytes)
    }

    /// The complete command as sent to the printer.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn payload(&self) -> &[u8] {
        &self.0[HEADER_LEN..]
    }

    /// Unpack the payload into one flag per print head pin, leftmost first.
    pub fn pixels(&self) -> impl Iterator<Item = bool> + '_ {
        self.payload()
            .iter()
            .flat_map(|byte| (0..8).rev().map(move |bit| byte & (1 << bit) != 0))
    }
}

impl Debug for RasterLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let row: String = self.pixels().map(|ink| if ink { '#' } else { '.' }).collect();
        write!(f, "RasterLine({})", row)
    }
}

/// Convert a monochrome bitmap into raster lines.
///
/// The tape leaves the printer the other way round than the image is stored,
/// so the last row of the bitmap is printed first.
pub fn encode(image: &GrayImage) -> Result<Vec<RasterLine>, Error> {
    let padding = Padding::for_width(image.width())?;

    let lines = (0..image.height())
        .rev()
        .map(|y| {
            let mut line = RasterLine::blank();
            let mut bit_writer = BitWriter::new(&mut line.0[HEADER_LEN..]);

            bit_writer.skip(padding.left);

            for x in 0..image.width() {
                bit_writer.write_bit(image.get_pixel(x, y).0[0] == INK);
            }

            // The right padding is already zero.
            line
        })
        .collect();

    Ok(lines)
}

/// Everything needed to print one label.
#[derive(Debug, Clone)]
pub struct PrintJob {
    lines: Vec<RasterLine>,
}

impl PrintJob {
    pub fn new(image: &GrayImage) -> Result<Self, Error> {
        Ok(Self {
            lines: encode(image)?,
        })
    }

    /// Decode a PNG (typically straight from the label renderer) and convert it to luma first.
    pub fn from_png(png: &[u8]) -> Result<Self, Error> {
        let image = image::load_from_memory_with_format(png, ImageFormat::Png)?;
        Self::new(&image.to_luma8())
    }

    pub fn lines(&self) -> &[RasterLine] {
        &self.lines
    }

    /// The commands to submit: one per raster line, then the end-of-print marker.
    pub fn into_commands(self) -> Vec<Vec<u8>> {
        self.lines
            .into_iter()
            .map(|line| line.0.to_vec())
            .chain(std::iter::once(command::END_OF_PRINT.to_vec()))
            .collect()
    }
}

impl Printer {
    pub async fn print(&self, image: &GrayImage) -> Result<(), PrinterError> {
        self.print_job(PrintJob::new(image)?).await
    }

    pub async fn print_png(&self, png: &[u8]) -> Result<(), PrinterError> {
        self.print_job(PrintJob::from_png(png)?).await
    }

    /// Submit a job as one batch, so lines of concurrent jobs never mix on the tape.
    pub async fn print_job(&self, job: PrintJob) -> Result<(), PrinterError> {
        let lines = job.lines().len();
        info!(lines, "printing label");

        self.submit_batch(job.into_commands()).await?;

        info!(lines, "label printed");
        Ok(())
    }
}
