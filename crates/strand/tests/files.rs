//! File scenarios: the cat shape (open, read, write, close) and error
//! classification for missing paths. File operations only have kernel
//! acceleration on the completion backend; elsewhere they take the
//! non-blocking fallback, and both routes must behave identically.

mod common;

use std::io::Write;
use std::sync::{Arc, Mutex};

use common::{backends, opts, STACK};
use strand::{Error, File, Runtime};

#[derive(Clone)]
struct CatJob {
    src: std::path::PathBuf,
    dst: std::path::PathBuf,
}

fn cat(rt: &Runtime, job: CatJob) {
    rt.spawn(STACK, move |rt| {
        let input = File::open(rt, &job.src).unwrap();
        let output = File::create(rt, &job.dst).unwrap();

        let mut buf = [0u8; 512];
        let mut offset = 0u64;
        loop {
            let n = input.read(rt, &mut buf, offset).unwrap();
            if n == 0 {
                break;
            }
            let written = output.write(rt, &buf[..n], offset).unwrap();
            assert_eq!(written, n);
            offset += n as u64;
        }

        input.close(rt).unwrap();
        output.close(rt).unwrap();
    })
    .unwrap();
}

#[test]
fn test_cat_copies_file_contents() {
    for backend in backends() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.txt");
        let dst = dir.path().join("out.txt");

        let mut f = std::fs::File::create(&src).unwrap();
        f.write_all(b"abc\n").unwrap();
        drop(f);

        let rt = Runtime::new(opts(backend)).unwrap();
        rt.entry(
            CatJob {
                src: src.clone(),
                dst: dst.clone(),
            },
            cat,
        )
        .unwrap();

        let copied = std::fs::read(&dst).unwrap();
        assert_eq!(copied, b"abc\n", "backend {:?}", backend);
    }
}

fn open_missing(rt: &Runtime, observed: Arc<Mutex<Option<Error>>>) {
    rt.spawn(STACK, move |rt| {
        let err = File::open(rt, "/definitely/not/a/real/file").unwrap_err();
        *observed.lock().unwrap() = Some(err);
    })
    .unwrap();
}

#[test]
fn test_open_missing_file_reports_enoent() {
    for backend in backends() {
        let observed = Arc::new(Mutex::new(None));
        let rt = Runtime::new(opts(backend)).unwrap();
        rt.entry(Arc::clone(&observed), open_missing).unwrap();

        let err = observed.lock().unwrap().take().unwrap();
        assert_eq!(err, Error::Unexpected(libc::ENOENT), "backend {:?}", backend);
        assert!(
            format!("{}", err).contains("No such file or directory"),
            "backend {:?}: {}",
            backend,
            err
        );
    }
}

fn write_to_inherited_fd(rt: &Runtime, pair: (i32, Arc<Mutex<Vec<u8>>>)) {
    let (write_fd, _sink) = pair;
    rt.spawn(STACK, move |rt| {
        let out = File::from_raw(write_fd);
        let n = out.write(rt, b"piped", File::OFFSET_CURRENT).unwrap();
        assert_eq!(n, 5);
        out.close(rt).unwrap();
    })
    .unwrap();
}

/// The stdout shape: wrapping an inherited descriptor and writing
/// through it, without the wrapper ever owning the fd.
#[test]
fn test_write_through_wrapped_descriptor() {
    for backend in backends() {
        let mut fds = [0i32; 2];
        let ret = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };
        assert_eq!(ret, 0);
        let (read_fd, write_fd) = (fds[0], fds[1]);

        let rt = Runtime::new(opts(backend)).unwrap();
        rt.entry(
            (write_fd, Arc::new(Mutex::new(Vec::new()))),
            write_to_inherited_fd,
        )
        .unwrap();

        let mut buf = [0u8; 16];
        let n = unsafe { libc::read(read_fd, buf.as_mut_ptr() as *mut _, buf.len()) };
        assert_eq!(n, 5);
        assert_eq!(&buf[..5], b"piped");

        unsafe {
            libc::close(read_fd);
            libc::close(write_fd);
        }
    }
}
