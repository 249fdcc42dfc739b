mod common;
use common::{dir_listing, motion_parameters, synthetic_run, write_matrix, write_text, write_volume, write_volume3};
use fmri_denoise::confounds::read_motion_parameters;
use fmri_denoise::{
    compcor_file, concat_confound_files, extend_motion_file, ConfoundConfig, ConfoundFiles,
    ConfoundTable, DenoiseError,
};
use approx::assert_abs_diff_eq;
use ndarray::{s, Array2, Array3};
use tempfile::TempDir;

fn single_column(n: usize, header: Option<&str>) -> String {
    let mut text = header.map(|h| format!("{h}\n")).unwrap_or_default();
    for i in 0..n {
        text.push_str(&format!("{:.4}\n", 0.1 + 0.01 * (i % 7) as f64));
    }
    text
}

// ── Motion ────────────────────────────────────────────────────────────────────

#[test]
fn motion_file_extension_writes_both_tables() {
    let dir = TempDir::new().unwrap();
    let pars = motion_parameters(100);
    let par_file = write_matrix(dir.path(), "run.par", &pars);

    let (tables, out) = extend_motion_file(&par_file, dir.path(), 2.0, &ConfoundConfig::default()).unwrap();
    assert_eq!(out.base, dir.path().join("new_moco_pars.tsv"));
    assert_eq!(out.extended, dir.path().join("ext_moco_pars.tsv"));

    let ext = ConfoundTable::read_tsv(&out.extended).unwrap();
    assert_eq!(ext.data.dim(), (100, 6 * (2 * 2 + 1)));
    let base = ConfoundTable::read_tsv(&out.base).unwrap();
    assert_eq!(base.data.dim(), (100, 6));

    // First six extended columns are the detrended parameters, not a copy.
    for (a, b) in ext.data.slice(s![.., ..6]).iter().zip(base.data.iter()) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
    }
    let differs = base.data.iter().zip(pars.iter()).any(|(a, b)| (a - b).abs() > 1e-3);
    assert!(differs, "base motion table is a pass-through of the input");
    assert_eq!(tables.extended.names, ext.names);
}

#[test]
fn derivative_orders_set_column_count() {
    let pars = motion_parameters(80);
    for orders in 0..4 {
        let cfg = ConfoundConfig { derivative_orders: orders, ..ConfoundConfig::default() };
        let t = fmri_denoise::extend_motion_parameters(&pars, 2.0, &cfg).unwrap();
        assert_eq!(t.extended.data.dim(), (80, 6 * (2 * orders + 1)));
    }
}

#[test]
fn five_column_par_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    let par_file = write_matrix(dir.path(), "bad.par", &Array2::zeros((50, 5)));
    let err = read_motion_parameters(&par_file).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DenoiseError>(),
        Some(DenoiseError::ShapeMismatch { .. })
    ));
}

// ── Concatenation ─────────────────────────────────────────────────────────────

#[test]
fn concatenation_order_and_output() {
    let dir = TempDir::new().unwrap();
    let par_file = write_matrix(dir.path(), "run.par", &motion_parameters(100));
    let (_, motion) = extend_motion_file(&par_file, dir.path(), 2.0, &ConfoundConfig::default()).unwrap();
    let fd = write_text(dir.path(), "fd.txt", &single_column(100, Some("FramewiseDisplacement")));
    let dvars = write_text(dir.path(), "dvars.txt", &single_column(100, None));

    let files = ConfoundFiles {
        motion: motion.extended,
        fd: Some(fd),
        compcor: None,
        dvars: Some(dvars),
    };
    let (table, path) = concat_confound_files(&files, dir.path()).unwrap();
    assert_eq!(path, dir.path().join("all_confounds.tsv"));
    assert_eq!(table.data.dim(), (100, 32));
    assert_eq!(table.names[30], "framewise_displacement");
    assert_eq!(table.names[31], "dvars");
    assert_eq!(ConfoundTable::read_tsv(&path).unwrap().names, table.names);
}

#[test]
fn dvars_one_row_short_is_alignment_error() {
    let dir = TempDir::new().unwrap();
    let par_file = write_matrix(dir.path(), "run.par", &motion_parameters(100));
    let (_, motion) = extend_motion_file(&par_file, dir.path(), 2.0, &ConfoundConfig::default()).unwrap();
    let dvars = write_text(dir.path(), "dvars.txt", &single_column(99, None));

    let files = ConfoundFiles {
        motion: motion.extended,
        dvars: Some(dvars),
        ..ConfoundFiles::default()
    };
    let err = concat_confound_files(&files, dir.path()).unwrap_err();
    match err.downcast_ref::<DenoiseError>() {
        Some(DenoiseError::ConfoundAlignment { rows, expected, .. }) => {
            assert_eq!((*rows, *expected), (99, 100));
        }
        other => panic!("expected ConfoundAlignment, got {other:?}"),
    }
    assert!(!dir.path().join("all_confounds.tsv").exists());
}

// ── aCompCor ──────────────────────────────────────────────────────────────────

fn probability_maps(shape: (usize, usize, usize)) -> (Array3<f64>, Array3<f64>) {
    let wm = Array3::from_shape_fn(shape, |(x, _, _)| if x < 2 { 0.99 } else { 0.2 });
    let csf = Array3::from_shape_fn(shape, |(x, _, _)| if x == shape.0 - 1 { 0.97 } else { 0.0 });
    (wm, csf)
}

#[test]
fn compcor_from_mask_files() {
    let dir = TempDir::new().unwrap();
    let input = write_volume(dir.path(), "bold.nii.gz", &synthetic_run((5, 4, 3, 60)), 2.0);
    let (wm, csf) = probability_maps((5, 4, 3));
    let maps = vec![
        write_volume3(dir.path(), "wm.nii.gz", &wm),
        write_volume3(dir.path(), "csf.nii.gz", &csf),
    ];
    let cfg = ConfoundConfig { n_compcor: 4, ..ConfoundConfig::default() };
    let (table, path) = compcor_file(&input, &maps, dir.path(), &cfg).unwrap();
    assert_eq!(path, dir.path().join("bold_acompcor.tsv"));
    assert_eq!(table.data.dim(), (60, 4));
    assert_eq!(table.names[3], "a_comp_cor_03");
    // Components are centred over time.
    for c in table.data.columns() {
        assert_abs_diff_eq!(c.mean().unwrap(), 0.0, epsilon = 1e-8);
    }
}

#[test]
fn compcor_mask_shape_mismatch_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let input = write_volume(dir.path(), "bold.nii.gz", &synthetic_run((5, 4, 3, 30)), 2.0);
    let (wm, _) = probability_maps((5, 4, 2));
    let maps = vec![write_volume3(dir.path(), "wm.nii.gz", &wm)];
    let before = dir_listing(dir.path());
    let err = compcor_file(&input, &maps, dir.path(), &ConfoundConfig::default()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DenoiseError>(),
        Some(DenoiseError::ShapeMismatch { .. })
    ));
    assert_eq!(dir_listing(dir.path()), before);
}
