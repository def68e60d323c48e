use vtlib::{
    ClassRegistry, Corners, ShapeI,
    annotations::BoundingBox,
    defer_folder_removal,
    file_util::{self, make_tmp_folder},
    get_test_folder, label_io,
};

#[test]
fn test_known_labels() {
    let shape = ShapeI::new(512, 256);
    let p = get_test_folder().join("known_labels.txt");
    let boxes = label_io::decode(&p, shape).unwrap().unwrap();
    let corners = boxes.iter().map(|bb| bb.corners).collect::<Vec<_>>();
    assert_eq!(
        corners,
        vec![
            Corners::new(192, 64, 320, 192),
            Corners::new(26, 39, 76, 63),
            Corners::new(256, 52, 512, 76),
        ]
    );
    let classes = ClassRegistry::from_file(&get_test_folder().join("classes.txt")).unwrap();
    let names = boxes
        .iter()
        .map(|bb| classes.name(bb.class_index).unwrap())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["car", "bus", "truck"]);
}

#[test]
fn test_rewrite_keeps_boxes() {
    let folder = make_tmp_folder("it-labels").unwrap();
    defer_folder_removal!(&folder);
    let shape = ShapeI::new(640, 480);
    let boxes = vec![
        BoundingBox::new(1, Corners::new(100, 50, 300, 250)),
        BoundingBox::new(0, Corners::new(0, 0, 640, 480)),
    ];
    let p = label_io::label_path(&folder.join("labels"), "img_001");
    label_io::write_labels(&p, &boxes, shape).unwrap();
    let content = file_util::read_to_string(&p).unwrap();
    // extent along x comes first
    assert!(content.starts_with("1 0.3125 0.3125 0.3125 0.4166"));
    let decoded = label_io::decode(&p, shape).unwrap().unwrap();
    assert_eq!(decoded, boxes);
    label_io::write_labels(&p, &[], shape).unwrap();
    assert_eq!(file_util::read_to_string(&p).unwrap(), "");
    assert_eq!(label_io::decode(&p, shape).unwrap(), Some(vec![]));
}
