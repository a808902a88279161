//! Classifier database archive: an explicit little-endian binary layout
//! framed by magic markers at both ends.
//!
//! Layout: start marker, camera metrics, training parameters, the imported
//! object-plane contour model, then per contour type the serialized class
//! list (founding transform, template maps, frequency table, running
//! statistics), then the end marker. The fern test table itself is not
//! stored; it is regenerated from the seed.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use nalgebra::{Matrix3, Vector2};
use tracing::info;

use crate::config::{CameraMetrics, TrainingParams};
use crate::detection::ferns::FernTests;
use crate::detection::template::ContourTemplate;
use crate::detection::{ContourClass, ContourDatabase};
use crate::error::{EdgetrackError, Result};

const MAGIC_START: &str = "TRACKMEdatabase5Start";
const MAGIC_END: &str = "TRACKMEdatabase5End";

/// Format version inside the framing markers.
const VERSION: u32 = 1;

fn write_u32<W: Write>(w: &mut W, v: u32) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn write_u64<W: Write>(w: &mut W, v: u64) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn write_f32<W: Write>(w: &mut W, v: f32) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn write_f64<W: Write>(w: &mut W, v: f64) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(r: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_f32<R: Read>(r: &mut R) -> Result<f32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(f32::from_le_bytes(buf))
}

fn read_f64<R: Read>(r: &mut R) -> Result<f64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

fn expect_magic<R: Read>(r: &mut R, expected: &'static str) -> Result<()> {
    let mut buf = vec![0u8; expected.len()];
    r.read_exact(&mut buf)?;
    if buf != expected.as_bytes() {
        return Err(EdgetrackError::BadMagic { expected });
    }
    Ok(())
}

/// Write the database to `path`.
pub fn save_database<P: AsRef<Path>>(path: P, db: &ContourDatabase) -> Result<()> {
    let mut w = BufWriter::new(File::create(path.as_ref())?);
    write_database(&mut w, db)?;
    w.flush()?;
    info!(path = %path.as_ref().display(), "database saved");
    Ok(())
}

/// Read a database from `path`.
pub fn load_database<P: AsRef<Path>>(path: P) -> Result<ContourDatabase> {
    let mut r = BufReader::new(File::open(path.as_ref())?);
    let db = read_database(&mut r)?;
    info!(path = %path.as_ref().display(), "database loaded");
    Ok(db)
}

pub fn write_database<W: Write>(w: &mut W, db: &ContourDatabase) -> Result<()> {
    w.write_all(MAGIC_START.as_bytes())?;
    write_u32(w, VERSION)?;

    write_u32(w, db.metrics.width as u32)?;
    write_u32(w, db.metrics.height as u32)?;
    write_f64(w, db.metrics.cx)?;
    write_f64(w, db.metrics.cy)?;

    write_u32(w, db.training.num_ferns as u32)?;
    write_u32(w, db.training.num_bits as u32)?;
    write_u32(w, db.training.patch_size as u32)?;
    write_u64(w, db.training.fern_seed)?;
    write_f64(w, db.training.warp_error_threshold)?;

    write_u32(w, db.contour_model.len() as u32)?;
    for points in &db.contour_model {
        write_u32(w, points.len() as u32)?;
        for p in points {
            write_f64(w, p.x)?;
            write_f64(w, p.y)?;
        }
    }

    write_u32(w, db.classes.len() as u32)?;
    for classes in &db.classes {
        write_u32(w, classes.len() as u32)?;
        for class in classes {
            write_class(w, class)?;
        }
    }

    w.write_all(MAGIC_END.as_bytes())?;
    Ok(())
}

pub fn read_database<R: Read>(r: &mut R) -> Result<ContourDatabase> {
    expect_magic(r, MAGIC_START)?;
    let version = read_u32(r)?;
    if version != VERSION {
        return Err(EdgetrackError::CorruptDatabase(format!(
            "unsupported version {version}"
        )));
    }

    let metrics = CameraMetrics {
        width: read_u32(r)? as usize,
        height: read_u32(r)? as usize,
        cx: read_f64(r)?,
        cy: read_f64(r)?,
    };
    let training = TrainingParams {
        num_ferns: read_u32(r)? as usize,
        num_bits: read_u32(r)? as usize,
        patch_size: read_u32(r)? as usize,
        fern_seed: read_u64(r)?,
        warp_error_threshold: read_f64(r)?,
    };
    training.validate()?;

    let num_types = read_u32(r)? as usize;
    if num_types > 1024 {
        return Err(EdgetrackError::CorruptDatabase(format!(
            "implausible contour type count {num_types}"
        )));
    }
    let mut contour_model = Vec::with_capacity(num_types);
    for _ in 0..num_types {
        let count = read_u32(r)? as usize;
        if count > 1 << 20 {
            return Err(EdgetrackError::CorruptDatabase(format!(
                "implausible model contour length {count}"
            )));
        }
        let mut points = Vec::with_capacity(count);
        for _ in 0..count {
            let x = read_f64(r)?;
            let y = read_f64(r)?;
            points.push(Vector2::new(x, y));
        }
        contour_model.push(points);
    }

    let class_types = read_u32(r)? as usize;
    if class_types != num_types {
        return Err(EdgetrackError::CorruptDatabase(format!(
            "class list count {class_types} does not match contour type count {num_types}"
        )));
    }
    let mut classes = Vec::with_capacity(num_types);
    for _ in 0..num_types {
        let count = read_u32(r)? as usize;
        let mut list = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            list.push(read_class(r, &training)?);
        }
        classes.push(list);
    }

    expect_magic(r, MAGIC_END)?;

    let tests = FernTests::generate(
        training.num_ferns,
        training.num_bits,
        training.patch_size,
        training.fern_seed,
    );
    Ok(ContourDatabase {
        valid: true,
        metrics,
        training,
        tests,
        contour_model,
        classes,
    })
}

fn write_class<W: Write>(w: &mut W, class: &ContourClass) -> Result<()> {
    for i in 0..3 {
        for j in 0..3 {
            write_f64(w, class.transform[(i, j)])?;
        }
    }

    let t = &class.template;
    write_u32(w, t.size as u32)?;
    for &d in &t.distance {
        write_f32(w, d)?;
    }
    for &(gx, gy) in &t.gradient {
        write_f32(w, gx)?;
        write_f32(w, gy)?;
    }

    write_u32(w, class.frequencies.len() as u32)?;
    for &f in &class.frequencies {
        write_u32(w, f)?;
    }
    write_u64(w, class.class_count)?;
    write_f64(w, class.accuracy_sum)?;
    write_f64(w, class.ambiguity_sum)?;
    write_u64(w, class.samples)?;
    Ok(())
}

fn read_class<R: Read>(r: &mut R, training: &TrainingParams) -> Result<ContourClass> {
    let mut transform = Matrix3::zeros();
    for i in 0..3 {
        for j in 0..3 {
            transform[(i, j)] = read_f64(r)?;
        }
    }

    let size = read_u32(r)? as usize;
    if size != training.patch_size {
        return Err(EdgetrackError::CorruptDatabase(format!(
            "template size {size} does not match patch size {}",
            training.patch_size
        )));
    }
    let mut distance = Vec::with_capacity(size * size);
    for _ in 0..size * size {
        distance.push(read_f32(r)?);
    }
    let mut gradient = Vec::with_capacity(size * size);
    for _ in 0..size * size {
        gradient.push((read_f32(r)?, read_f32(r)?));
    }
    let template = ContourTemplate::from_parts(size, distance, gradient);

    let freq_len = read_u32(r)? as usize;
    let expected = training.num_ferns << training.num_bits;
    if freq_len != expected {
        return Err(EdgetrackError::CorruptDatabase(format!(
            "frequency table length {freq_len}, expected {expected}"
        )));
    }
    let mut frequencies = Vec::with_capacity(freq_len);
    for _ in 0..freq_len {
        frequencies.push(read_u32(r)?);
    }

    let mut class = ContourClass::new(
        template,
        transform,
        training.num_ferns,
        training.num_bits,
    );
    class.frequencies = frequencies;
    class.class_count = read_u64(r)?;
    class.accuracy_sum = read_f64(r)?;
    class.ambiguity_sum = read_f64(r)?;
    class.samples = read_u64(r)?;
    Ok(class)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use crate::camera::Pose;
    use crate::detection::Contour;
    use crate::field::DistanceField;
    use crate::solver::Workspace;

    fn object_ring(points: usize, radius: f64) -> Vec<Vector2<f64>> {
        (0..points)
            .map(|i| {
                let a = i as f64 / points as f64 * std::f64::consts::TAU;
                Vector2::new(radius * a.cos(), radius * a.sin())
            })
            .collect()
    }

    fn trained_database() -> ContourDatabase {
        let metrics = CameraMetrics::new(256, 256);
        let model = vec![object_ring(48, 1.0), object_ring(32, 0.5)];
        let mut db = ContourDatabase::new(metrics, TrainingParams::default(), model).unwrap();

        let mut mask = vec![false; 256 * 256];
        let points: Vec<Vector2<f64>> = (0..540)
            .map(|i| {
                let a = i as f64 / 540.0 * std::f64::consts::TAU;
                let p = Vector2::new(128.0 + 40.0 * a.cos(), 128.0 + 40.0 * a.sin());
                mask[p.y.round() as usize * 256 + p.x.round() as usize] = true;
                p
            })
            .collect();
        let field = DistanceField::from_edge_mask(&mask, 256, 256);
        let mut contour = Contour::new(points, true);
        let mut ws = Workspace::new();
        contour.normalize(&mut ws);
        db.insert_contour_pose(&field, &contour, &Pose::default(), &mut ws)
            .unwrap();
        db
    }

    #[test]
    fn test_round_trip_preserves_database() {
        let db = trained_database();
        let mut buf = Vec::new();
        write_database(&mut buf, &db).unwrap();
        let restored = read_database(&mut Cursor::new(&buf)).unwrap();

        assert!(restored.is_valid());
        assert_eq!(restored.num_types(), db.num_types());
        assert_eq!(restored.contour_model(0), db.contour_model(0));
        assert_eq!(restored.contour_model(1), db.contour_model(1));
        assert_eq!(restored.num_classes(0), db.num_classes(0));
        let a = db.class(0, 0);
        let b = restored.class(0, 0);
        assert_eq!(a.frequencies, b.frequencies);
        assert_eq!(a.class_count, b.class_count);
        assert_eq!(a.template.distance, b.template.distance);
        for i in 0..3 {
            for j in 0..3 {
                assert_eq!(a.transform[(i, j)], b.transform[(i, j)]);
            }
        }
    }

    #[test]
    fn test_bad_start_magic_rejected() {
        let err = read_database(&mut Cursor::new(b"NOTADATABASE".to_vec())).unwrap_err();
        assert!(matches!(err, EdgetrackError::BadMagic { .. }));
    }

    #[test]
    fn test_truncated_archive_rejected() {
        let db = trained_database();
        let mut buf = Vec::new();
        write_database(&mut buf, &db).unwrap();
        buf.truncate(buf.len() / 2);
        assert!(read_database(&mut Cursor::new(&buf)).is_err());
    }

    #[test]
    fn test_corrupt_end_magic_rejected() {
        let db = trained_database();
        let mut buf = Vec::new();
        write_database(&mut buf, &db).unwrap();
        let n = buf.len();
        buf[n - 1] ^= 0xff;
        let err = read_database(&mut Cursor::new(&buf)).unwrap_err();
        assert!(matches!(err, EdgetrackError::BadMagic { .. }));
    }
}
