use facet_cud::error::{MatFileError, OrbitError};
use facet_cud::orbit::matfile::{MatFile, MatVar};
use facet_cud::orbit::{Axis, Bpm, Orbit, OrbitModel};
use facet_cud::pv::{MINOR_ALARM, NO_ALARM};

fn sample_orbit() -> Orbit {
    let mut a = Bpm::epics("BPMS:IN10:221", 1001.83, "TH");
    a.update(Axis::X, 0.125, NO_ALARM);
    a.update(Axis::Y, -0.5, NO_ALARM);
    a.update(Axis::Tmit, 1.5e9, NO_ALARM);
    let mut b = Bpm::epics("BPMS:IN10:731", 1010.0, "TH").with_energy_flag(true);
    b.update(Axis::X, 2.0, MINOR_ALARM);
    b.update(Axis::Y, 0.0, NO_ALARM);
    b.update(Axis::Tmit, f64::NAN, NO_ALARM);
    Orbit::from_bpms("Injector", [a, b]).unwrap()
}

#[test]
fn snapshot_file_restores_readings() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ref_orbit_inj_20240101000000.mat");
    sample_orbit().write_matlab_file(&path).unwrap();

    let loaded = Orbit::from_matlab_file(&path).unwrap();
    assert_eq!(loaded.name(), "Injector");
    assert_eq!(loaded.names(), vec!["BPMS:IN10:221", "BPMS:IN10:731"]);
    assert_eq!(loaded.z_vals(), vec![1001.83, 1010.0]);

    let a = loaded.bpm("BPMS:IN10:221").unwrap();
    assert_eq!(a.value(Axis::X), 0.125);
    assert_eq!(a.value(Axis::Tmit), 1.5e9);
    assert!(!a.is_energy_bpm);

    let b = loaded.bpm("BPMS:IN10:731").unwrap();
    assert!(b.is_energy_bpm);
    assert_eq!(b.severity(Axis::X), MINOR_ALARM);
    assert!(b.value(Axis::Tmit).is_nan());
    assert!(!b.is_ok(Axis::Tmit));
}

#[test]
fn bpm_names_are_a_padded_char_matrix() {
    let mat = sample_orbit().to_matfile();
    let var = mat.get("bpm_names").unwrap();
    assert_eq!(var.dims(), &[2, 13]);
    assert_eq!(
        mat.text_rows("bpm_names").unwrap(),
        vec!["BPMS:IN10:221".to_string(), "BPMS:IN10:731".to_string()]
    );
}

#[test]
fn readings_without_severities_load_as_good() {
    let mut mat = MatFile::new();
    mat.insert_text_rows("bpm_names", &["BPMS:LI20:2050".to_string()]);
    mat.insert_row("z", vec![1880.0]);
    mat.insert_row("x", vec![0.1]);
    mat.insert_row("y", vec![0.2]);
    mat.insert_row("tmit", vec![1e10]);
    let parsed = MatFile::from_bytes(&mat.to_bytes()).unwrap();

    let orbit = Orbit::from_matfile(&parsed).unwrap();
    assert_eq!(orbit.name(), "reference");
    assert!(orbit.bpm("BPMS:LI20:2050").unwrap().is_ok(Axis::X));
}

#[test]
fn length_mismatch_is_reported() {
    let mut mat = sample_orbit().to_matfile();
    mat.insert_row("x", vec![1.0]);
    match Orbit::from_matfile(&mat) {
        Err(MatFileError::BadVariable { name, .. }) => assert_eq!(name, "x"),
        other => panic!("expected bad variable, got {:?}", other.map(|o| o.len())),
    }
}

#[test]
fn missing_variable_is_reported() {
    let mut mat = MatFile::new();
    mat.insert_text_rows("bpm_names", &["BPMS:LI20:2050".to_string()]);
    mat.insert_row("z", vec![1880.0]);
    assert!(matches!(Orbit::from_matfile(&mat), Err(MatFileError::MissingVariable(v)) if v == "x"));
}

#[test]
fn garbage_is_not_a_matfile() {
    assert!(matches!(MatFile::from_bytes(b"not a mat file"), Err(MatFileError::BadHeader(_))));
    let mut bytes = vec![b' '; 128];
    bytes[..19].copy_from_slice(b"MATLAB 5.0 MAT-file");
    bytes[126] = b'M';
    bytes[127] = b'I';
    assert!(matches!(MatFile::from_bytes(&bytes), Err(MatFileError::Unsupported(_))));
}

#[test]
fn truncated_element_is_corrupt() {
    let mut bytes = sample_orbit().to_matfile().to_bytes();
    bytes.truncate(bytes.len() - 5);
    assert!(matches!(MatFile::from_bytes(&bytes), Err(MatFileError::Corrupt(_))));
}

#[test]
fn char_variable_keeps_column_major_layout() {
    let mut mat = MatFile::new();
    mat.insert_text_rows("n", &["ab".to_string(), "c".to_string()]);
    match mat.get("n").unwrap() {
        MatVar::Char { dims, chars } => {
            assert_eq!(dims, &vec![2, 2]);
            assert_eq!(chars, &vec!['a', 'c', 'b', ' ']);
        }
        other => panic!("unexpected {other:?}"),
    }
}

fn element(out: &mut Vec<u8>, ty: u32, data: &[u8]) {
    out.extend_from_slice(&ty.to_le_bytes());
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(data);
    out.resize(out.len() + (8 - data.len() % 8) % 8, 0);
}

/// A file holding one matrix variable `a` with the given class and dimensions and no data.
fn matrix_with_dims(class: u32, storage: u32, dims: &[i32]) -> Vec<u8> {
    let mut body = Vec::new();
    element(&mut body, 6, &[class.to_le_bytes(), 0u32.to_le_bytes()].concat());
    let dims: Vec<u8> = dims.iter().flat_map(|d| d.to_le_bytes()).collect();
    element(&mut body, 5, &dims);
    element(&mut body, 1, b"a");
    element(&mut body, storage, &[]);

    let mut bytes = MatFile::new().to_bytes();
    element(&mut bytes, 14, &body);
    bytes
}

#[test]
fn overflowing_dimensions_are_corrupt() {
    let bytes = matrix_with_dims(6, 9, &[i32::MAX; 3]);
    assert!(matches!(MatFile::from_bytes(&bytes), Err(MatFileError::Corrupt(_))));

    // Large but empty: the product fits, the char matrix just has no rows to read.
    let bytes = matrix_with_dims(4, 4, &[i32::MAX, i32::MAX, 0]);
    let mat = MatFile::from_bytes(&bytes).unwrap();
    assert!(matches!(mat.text_rows("a"), Err(MatFileError::BadVariable { .. })));
}

#[test]
fn non_finite_z_in_snapshot_is_rejected() {
    let mut mat = sample_orbit().to_matfile();
    mat.insert_row("z", vec![1001.83, f64::NAN]);
    assert!(matches!(
        Orbit::from_matfile(&mat),
        Err(MatFileError::Orbit(OrbitError::NonFiniteZ { .. }))
    ));
}

#[test]
fn wrongly_typed_optional_variables_are_reported() {
    let mut mat = sample_orbit().to_matfile();
    mat.insert_text("x_sevr", "oops");
    assert!(matches!(Orbit::from_matfile(&mat), Err(MatFileError::BadVariable { name, .. }) if name == "x_sevr"));

    let mut mat = sample_orbit().to_matfile();
    mat.insert_text("energy_bpm", "no");
    assert!(matches!(Orbit::from_matfile(&mat), Err(MatFileError::BadVariable { name, .. }) if name == "energy_bpm"));
}
