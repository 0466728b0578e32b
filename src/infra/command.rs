//! 外部命令调用

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};
use std::thread;

/// 查找可执行文件路径
///
/// 优先 PATH，其次常见安装位置；都找不到时原样返回，交给系统解析
pub fn resolve_program(program: &str) -> String {
    if let Ok(path) = which::which(program) {
        return path.to_string_lossy().to_string();
    }

    // 服务环境可能没有完整 PATH
    let mut candidates: Vec<PathBuf> = vec![
        PathBuf::from("/usr/local/bin").join(program),
        PathBuf::from("/opt/homebrew/bin").join(program),
    ];
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".local/bin").join(program));
    }

    candidates
        .into_iter()
        .find(|p| p.exists())
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|| program.to_string())
}

/// 执行命令，把 `input` 写入 stdin，等待结束并收集输出
///
/// stdin 在独立线程写入，与读取 stdout/stderr 同时进行；
/// 会回显输入的命令在输出超过管道缓冲区时不会互相阻塞
pub fn run_with_stdin(program: &str, args: &[String], input: &[u8]) -> io::Result<Output> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stdin = child.stdin.take();
    thread::scope(|scope| {
        let writer = stdin.map(|mut stdin| scope.spawn(move || stdin.write_all(input)));
        let output = child.wait_with_output()?;

        if let Some(writer) = writer {
            match writer.join() {
                Ok(Ok(())) => {}
                // 命令未读完输入就退出
                Ok(Err(e)) if e.kind() == io::ErrorKind::BrokenPipe => {}
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(io::Error::other("stdin writer panicked")),
            }
        }
        Ok(output)
    })
}
