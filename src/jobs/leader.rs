//! Leader-side pipeline assembly.
//!
//! The leader is the first child of [`run`](crate::jobs::run). It puts
//! itself in a fresh process group, forks one grandchild per pipeline
//! stage with the stages chained by pipes, reaps all of them, and
//! reports the last stage's fate: its exit code when it exited
//! normally, SIGABRT on itself when the stage died by signal. Any OS
//! failure while assembling the pipeline takes the whole group down.

use std::ffi::CString;
use std::ptr;

use crate::store::Store;
use crate::syntax::{Command, Pipeline};
use crate::sys::errno;
use crate::sys::syscalls::{
    self, O_CREAT, O_RDONLY, O_TRUNC, O_WRONLY, STDIN_FILENO, STDOUT_FILENO, c_char, c_int, pid_t,
};

/// Kill the whole job and die. Used for failures that leave the
/// pipeline half-assembled.
fn fail(pgid: pid_t) -> ! {
    unsafe {
        syscalls::killpg(pgid, syscalls::SIGKILL);
        syscalls::abort();
    }
}

fn open_path(path: &str, flags: c_int, mode: c_int) -> c_int {
    let Ok(cpath) = CString::new(path) else {
        return -1;
    };
    unsafe { syscalls::open(cpath.as_ptr() as *const c_char, flags, mode) }
}

/// Redirect stdio and exec one stage. Never returns; exec failure
/// aborts the stage child.
unsafe fn exec_stage(command: &Command, store: &Store, in_fd: c_int, out_fd: c_int) -> ! {
    unsafe {
        if in_fd != STDIN_FILENO {
            if syscalls::dup2(in_fd, STDIN_FILENO) < 0 {
                syscalls::abort();
            }
            syscalls::close(in_fd);
        }
        if out_fd != STDOUT_FILENO {
            if syscalls::dup2(out_fd, STDOUT_FILENO) < 0 {
                syscalls::abort();
            }
            syscalls::close(out_fd);
        }

        let words: Vec<CString> = command
            .args
            .iter()
            .map(|arg| CString::new(arg.eval_to_string(store)).unwrap_or_default())
            .collect();
        if words.is_empty() {
            syscalls::abort();
        }
        let mut argv: Vec<*const c_char> = words.iter().map(|w| w.as_ptr()).collect();
        argv.push(ptr::null());

        syscalls::execvp(argv[0], argv.as_ptr());
        syscalls::abort();
    }
}

/// Run a pipeline as its leader process. Only ever called in the child
/// of `fork`; the capture pipe, when present, has already been duped
/// onto our stdout.
pub fn run(pipeline: &Pipeline, store: &Store) -> ! {
    unsafe {
        let pgid = syscalls::getpid();
        syscalls::setpgid(pgid, pgid);

        let mut prev_in = STDIN_FILENO;
        if let Some(ref path) = pipeline.input_file {
            prev_in = open_path(path, O_RDONLY, 0);
            if prev_in < 0 {
                fail(pgid);
            }
        }

        let last = pipeline.commands.len() - 1;
        for command in &pipeline.commands[..last] {
            let mut fds = [0 as c_int; 2];
            if syscalls::pipe(fds.as_mut_ptr()) != 0 {
                fail(pgid);
            }
            let pid = syscalls::fork();
            if pid < 0 {
                fail(pgid);
            }
            if pid == 0 {
                syscalls::close(fds[0]);
                syscalls::setpgid(0, pgid);
                exec_stage(command, store, prev_in, fds[1]);
            }
            syscalls::close(fds[1]);
            if prev_in != STDIN_FILENO {
                syscalls::close(prev_in);
            }
            prev_in = fds[0];
        }

        // The last stage writes to the output file, or to our stdout,
        // which in the capture case is the parent's capture pipe.
        let mut out_fd = STDOUT_FILENO;
        if !pipeline.capture_output {
            if let Some(ref path) = pipeline.output_file {
                out_fd = open_path(path, O_WRONLY | O_CREAT | O_TRUNC, 0o644);
                if out_fd < 0 {
                    fail(pgid);
                }
            }
        }
        let last_pid = syscalls::fork();
        if last_pid < 0 {
            fail(pgid);
        }
        if last_pid == 0 {
            syscalls::setpgid(0, pgid);
            exec_stage(&pipeline.commands[last], store, prev_in, out_fd);
        }
        if out_fd != STDOUT_FILENO {
            syscalls::close(out_fd);
        }
        if prev_in != STDIN_FILENO {
            syscalls::close(prev_in);
        }

        // Reap every stage; the last stage's status becomes our own.
        let mut last_status: c_int = 0;
        loop {
            let mut st: c_int = 0;
            let pid = syscalls::waitpid(-1, &mut st, 0);
            if pid < 0 {
                if errno::get_errno() == errno::EINTR {
                    continue;
                }
                break;
            }
            if pid == last_pid {
                last_status = st;
            }
        }
        if (last_status & 0x7f) == 0 {
            syscalls::_exit((last_status >> 8) & 0xff);
        }
        syscalls::abort();
    }
}
